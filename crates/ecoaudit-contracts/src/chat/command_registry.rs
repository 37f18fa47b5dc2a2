#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "describe",
        action: "set_description",
    },
    CommandSpec {
        command: "remove",
        action: "remove_image",
    },
];

pub(crate) const MULTI_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "add",
    action: "add_images",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "images",
        action: "list_images",
    },
    CommandSpec {
        command: "audit",
        action: "submit",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "wait",
        action: "wait",
    },
    CommandSpec {
        command: "cancel",
        action: "cancel",
    },
    CommandSpec {
        command: "new",
        action: "reset",
    },
    CommandSpec {
        command: "schema",
        action: "schema",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/add",
    "/remove",
    "/describe",
    "/images",
    "/audit",
    "/status",
    "/wait",
    "/cancel",
    "/new",
    "/schema",
    "/help",
];
