#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ArgShape {
    None,
    /// Everything after the command, trimmed.
    Raw,
    /// One token; quoted values may contain spaces.
    Single,
    /// Shell-style list of paths.
    Paths,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub shape: ArgShape,
    pub usage: &'static str,
    pub summary: &'static str,
}

pub(crate) const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "tier",
        shape: ArgShape::Single,
        usage: "/tier standard|pro",
        summary: "switch model tier",
    },
    CommandSpec {
        command: "ratio",
        shape: ArgShape::Single,
        usage: "/ratio 1:1|3:4|4:3|9:16|16:9",
        summary: "set aspect ratio",
    },
    CommandSpec {
        command: "size",
        shape: ArgShape::Single,
        usage: "/size 1K|2K|4K|off",
        summary: "set output size (pro only)",
    },
    CommandSpec {
        command: "seed",
        shape: ArgShape::Single,
        usage: "/seed <n>|off",
        summary: "fix or clear the seed",
    },
    CommandSpec {
        command: "attach",
        shape: ArgShape::Paths,
        usage: "/attach <path>...",
        summary: "stage reference images",
    },
    CommandSpec {
        command: "detach",
        shape: ArgShape::Single,
        usage: "/detach <upload-id>",
        summary: "drop one staged image",
    },
    CommandSpec {
        command: "purge",
        shape: ArgShape::None,
        usage: "/purge",
        summary: "drop every staged image",
    },
    CommandSpec {
        command: "evolve",
        shape: ArgShape::Single,
        usage: "/evolve <artifact-id>",
        summary: "stage an artifact as reference",
    },
    CommandSpec {
        command: "search",
        shape: ArgShape::Raw,
        usage: "/search <text>",
        summary: "filter history by prompt",
    },
    CommandSpec {
        command: "sort",
        shape: ArgShape::Single,
        usage: "/sort newest|oldest",
        summary: "order history",
    },
    CommandSpec {
        command: "history",
        shape: ArgShape::None,
        usage: "/history",
        summary: "list vault artifacts",
    },
    CommandSpec {
        command: "remove",
        shape: ArgShape::Single,
        usage: "/remove <artifact-id>",
        summary: "delete an artifact",
    },
    CommandSpec {
        command: "export",
        shape: ArgShape::Paths,
        usage: "/export <artifact-id> [dir]",
        summary: "write image and receipt",
    },
    CommandSpec {
        command: "link",
        shape: ArgShape::None,
        usage: "/link",
        summary: "select an API credential",
    },
    CommandSpec {
        command: "status",
        shape: ArgShape::None,
        usage: "/status",
        summary: "show session settings",
    },
    CommandSpec {
        command: "help",
        shape: ArgShape::None,
        usage: "/help",
        summary: "show this list",
    },
    CommandSpec {
        command: "quit",
        shape: ArgShape::None,
        usage: "/quit",
        summary: "leave the studio",
    },
];

pub(crate) const ALIASES: &[(&str, &str)] = &[("exit", "quit"), ("rm", "remove"), ("ls", "history")];

pub(crate) fn find_command(command: &str) -> Option<&'static CommandSpec> {
    let canonical = ALIASES
        .iter()
        .find(|(alias, _)| *alias == command)
        .map(|(_, target)| *target)
        .unwrap_or(command);
    COMMANDS.iter().find(|spec| spec.command == canonical)
}

pub fn studio_help_lines() -> Vec<String> {
    let width = COMMANDS
        .iter()
        .map(|spec| spec.usage.len())
        .max()
        .unwrap_or(0);
    COMMANDS
        .iter()
        .map(|spec| format!("{:<width$}  {}", spec.usage, spec.summary))
        .collect()
}
