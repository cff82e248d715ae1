use crate::artifact::{AspectRatio, ImageSize, ModelTier};
use crate::vault::SortOrder;

use super::command_registry::{find_command, ArgShape, CommandSpec};

/// One line of studio input, resolved to what the session should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudioIntent {
    Noop,
    Generate { prompt: String },
    SetTier(ModelTier),
    SetRatio(AspectRatio),
    SetSize(Option<ImageSize>),
    SetSeed(Option<i64>),
    Attach { paths: Vec<String> },
    Detach { id: String },
    Purge,
    Evolve { id: String },
    Search { text: String },
    Sort(SortOrder),
    History,
    Remove { id: String },
    Export { id: String, dir: Option<String> },
    Link,
    Status,
    Help,
    Quit,
    /// A known command with an unusable argument.
    Invalid { command: String, message: String },
    Unknown { command: String, arg: String },
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

fn is_off(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "" | "off" | "none" | "auto" | "clear"
    )
}

fn invalid(spec: &CommandSpec, message: impl Into<String>) -> StudioIntent {
    StudioIntent::Invalid {
        command: spec.command.to_string(),
        message: format!("{} (usage: {})", message.into(), spec.usage),
    }
}

fn required_id(spec: &CommandSpec, value: String) -> Result<String, StudioIntent> {
    if value.is_empty() {
        return Err(invalid(spec, "missing id"));
    }
    Ok(value)
}

fn resolve(spec: &CommandSpec, arg: &str) -> StudioIntent {
    let single = || parse_single_arg(arg);
    let outcome: Result<StudioIntent, StudioIntent> = match spec.command {
        "tier" => single()
            .parse::<ModelTier>()
            .map(StudioIntent::SetTier)
            .map_err(|err| invalid(spec, err)),
        "ratio" => single()
            .parse::<AspectRatio>()
            .map(StudioIntent::SetRatio)
            .map_err(|err| invalid(spec, err)),
        "size" => {
            let value = single();
            if is_off(&value) {
                Ok(StudioIntent::SetSize(None))
            } else {
                value
                    .parse::<ImageSize>()
                    .map(|size| StudioIntent::SetSize(Some(size)))
                    .map_err(|err| invalid(spec, err))
            }
        }
        "seed" => {
            let value = single();
            if is_off(&value) {
                Ok(StudioIntent::SetSeed(None))
            } else {
                value
                    .parse::<i64>()
                    .map(|seed| StudioIntent::SetSeed(Some(seed)))
                    .map_err(|_| invalid(spec, format!("'{value}' is not an integer seed")))
            }
        }
        "attach" => {
            let paths = parse_path_args(arg);
            if paths.is_empty() {
                Err(invalid(spec, "no paths given"))
            } else {
                Ok(StudioIntent::Attach { paths })
            }
        }
        "detach" => required_id(spec, single()).map(|id| StudioIntent::Detach { id }),
        "purge" => Ok(StudioIntent::Purge),
        "evolve" => required_id(spec, single()).map(|id| StudioIntent::Evolve { id }),
        "search" => Ok(StudioIntent::Search {
            text: arg.trim().to_string(),
        }),
        "sort" => single()
            .parse::<SortOrder>()
            .map(StudioIntent::Sort)
            .map_err(|err| invalid(spec, err)),
        "history" => Ok(StudioIntent::History),
        "remove" => required_id(spec, single()).map(|id| StudioIntent::Remove { id }),
        "export" => {
            let mut parts = parse_path_args(arg).into_iter();
            match parts.next() {
                Some(id) => Ok(StudioIntent::Export {
                    id,
                    dir: parts.next(),
                }),
                None => Err(invalid(spec, "missing id")),
            }
        }
        "link" => Ok(StudioIntent::Link),
        "status" => Ok(StudioIntent::Status),
        "help" => Ok(StudioIntent::Help),
        "quit" => Ok(StudioIntent::Quit),
        other => Ok(StudioIntent::Unknown {
            command: other.to_string(),
            arg: arg.to_string(),
        }),
    };
    if spec.shape == ArgShape::None && !arg.is_empty() {
        tracing::debug!(command = spec.command, arg, "ignoring argument");
    }
    outcome.unwrap_or_else(|intent| intent)
}

pub fn parse_intent(text: &str) -> StudioIntent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return StudioIntent::Noop;
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();
            return match find_command(&command) {
                Some(spec) => resolve(spec, arg),
                None => StudioIntent::Unknown {
                    command,
                    arg: arg.to_string(),
                },
            };
        }
    }

    StudioIntent::Generate {
        prompt: raw_trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_generates() {
        assert_eq!(
            parse_intent("  a red fox at dawn "),
            StudioIntent::Generate {
                prompt: "a red fox at dawn".to_string()
            }
        );
        assert_eq!(parse_intent("   "), StudioIntent::Noop);
    }

    #[test]
    fn parse_settings_commands() {
        assert_eq!(parse_intent("/tier PRO"), StudioIntent::SetTier(ModelTier::Pro));
        assert_eq!(
            parse_intent("/ratio 16:9"),
            StudioIntent::SetRatio(AspectRatio::Wide)
        );
        assert_eq!(
            parse_intent("/size 4k"),
            StudioIntent::SetSize(Some(ImageSize::FourK))
        );
        assert_eq!(parse_intent("/size off"), StudioIntent::SetSize(None));
        assert_eq!(parse_intent("/seed 42"), StudioIntent::SetSeed(Some(42)));
        assert_eq!(parse_intent("/seed"), StudioIntent::SetSeed(None));
        assert_eq!(parse_intent("/sort oldest"), StudioIntent::Sort(SortOrder::Oldest));
    }

    #[test]
    fn bad_arguments_are_reported_with_usage() {
        match parse_intent("/seed banana") {
            StudioIntent::Invalid { command, message } => {
                assert_eq!(command, "seed");
                assert!(message.contains("/seed <n>|off"));
            }
            other => panic!("unexpected intent: {other:?}"),
        }
        assert!(matches!(
            parse_intent("/ratio 2:3"),
            StudioIntent::Invalid { .. }
        ));
        assert!(matches!(parse_intent("/remove"), StudioIntent::Invalid { .. }));
    }

    #[test]
    fn parse_attach_quoted_paths() {
        assert_eq!(
            parse_intent("/attach \"/tmp/a b.png\" c.png"),
            StudioIntent::Attach {
                paths: vec!["/tmp/a b.png".to_string(), "c.png".to_string()]
            }
        );
    }

    #[test]
    fn parse_export_with_optional_dir() {
        assert_eq!(
            parse_intent("/export abc"),
            StudioIntent::Export {
                id: "abc".to_string(),
                dir: None
            }
        );
        assert_eq!(
            parse_intent("/export abc \"/tmp/out dir\""),
            StudioIntent::Export {
                id: "abc".to_string(),
                dir: Some("/tmp/out dir".to_string())
            }
        );
    }

    #[test]
    fn search_keeps_raw_text() {
        assert_eq!(
            parse_intent("/search  Red Fox "),
            StudioIntent::Search {
                text: "Red Fox".to_string()
            }
        );
        assert_eq!(
            parse_intent("/search"),
            StudioIntent::Search {
                text: String::new()
            }
        );
    }

    #[test]
    fn aliases_and_unknown_commands() {
        assert_eq!(parse_intent("/exit"), StudioIntent::Quit);
        assert_eq!(
            parse_intent("/rm abc"),
            StudioIntent::Remove {
                id: "abc".to_string()
            }
        );
        assert_eq!(
            parse_intent("/magic foo bar"),
            StudioIntent::Unknown {
                command: "magic".to_string(),
                arg: "foo bar".to_string()
            }
        );
    }
}
