//! Line command parsing for the interactive console.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Help,
    List,
    Add { name: String, file: PathBuf },
    /// `None` deactivates.
    Activate(Option<String>),
    Remove(String),
    Edit(String),
    Start,
    Stop,
    Restart,
    Status,
    Groups,
    Select { group: String, node: String },
    Delay(String),
    Version,
    Quit,
}

pub(crate) const HELP: &[&str] = &[
    "Commands:",
    "  list                      show profiles (* marks the active one)",
    "  add <name> <file>         import a JSON profile",
    "  activate <id|->           make a profile active, or `-` to clear",
    "  remove <id>               delete a profile",
    "  edit <id>                 open a profile in the system editor",
    "  start | stop | restart    control sing-box",
    "  status                    show the service status",
    "  groups                    show selectable proxy groups",
    "  select <group> <node>     switch a group to another node",
    "  delay <group>             probe latency of every node in a group",
    "  version                   show the sing-box version",
    "  quit                      stop sing-box and exit",
    "Quote names that contain spaces: select \"Proxy\" \"HK 01\"",
];

/// Parse one input line. Blank lines yield `Ok(None)`.
pub(crate) fn parse(line: &str) -> Result<Option<Command>, String> {
    let args = split_args(line)?;
    let Some((head, rest)) = args.split_first() else {
        return Ok(None);
    };

    let cmd = match (head.to_ascii_lowercase().as_str(), rest) {
        ("help" | "?", []) => Command::Help,
        ("list" | "ls", []) => Command::List,
        ("add", [name, file]) => Command::Add {
            name: name.clone(),
            file: PathBuf::from(file),
        },
        ("activate" | "use", []) => Command::Activate(None),
        ("activate" | "use", [id]) if id == "-" => Command::Activate(None),
        ("activate" | "use", [id]) => Command::Activate(Some(id.clone())),
        ("remove" | "rm", [id]) => Command::Remove(id.clone()),
        ("edit", [id]) => Command::Edit(id.clone()),
        ("start", []) => Command::Start,
        ("stop", []) => Command::Stop,
        ("restart", []) => Command::Restart,
        ("status", []) => Command::Status,
        ("groups", []) => Command::Groups,
        ("select", [group, node]) => Command::Select {
            group: group.clone(),
            node: node.clone(),
        },
        ("delay", [group]) => Command::Delay(group.clone()),
        ("version", []) => Command::Version,
        ("quit" | "exit" | "q", []) => Command::Quit,
        (other, _) => return Err(usage(other)),
    };
    Ok(Some(cmd))
}

fn usage(head: &str) -> String {
    let expected = match head {
        "add" => "add <name> <file>",
        "activate" | "use" => "activate <id|->",
        "remove" | "rm" => "remove <id>",
        "edit" => "edit <id>",
        "select" => "select <group> <node>",
        "delay" => "delay <group>",
        "help" | "?" | "list" | "ls" | "start" | "stop" | "restart" | "status" | "groups"
        | "version" | "quit" | "exit" | "q" => return format!("`{head}` takes no arguments"),
        _ => return format!("unknown command `{head}`; type `help`"),
    };
    format!("usage: {expected}")
}

/// Whitespace-separated words; double quotes group words and may be escaped with `\"`.
fn split_args(line: &str) -> Result<Vec<String>, String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quoted = false;
    let mut chars = line.trim().chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            '\\' if quoted => match chars.next() {
                Some(next) => current.push(next),
                None => return Err("dangling escape".into()),
            },
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if quoted {
        return Err("unterminated quote".into());
    }
    if in_word {
        args.push(current);
    }
    Ok(args)
}
