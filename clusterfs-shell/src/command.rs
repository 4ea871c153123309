use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

/// Name, usage and description of every command, in the order `help` prints them.
pub const COMMANDS: &[(&str, &str, &str)] = &[
    ("cp", "cp s1 s2", "copies file s1 into file s2"),
    ("mv", "mv s1 s2", "moves file s1 into file s2"),
    ("rm", "rm [-r] s1", "removes file s1, -r removes a directory with its content"),
    ("mkdir", "mkdir a1", "creates a new folder a1"),
    ("rmdir", "rmdir a1", "removes the empty folder a1"),
    ("touch", "touch s1", "creates an empty file s1"),
    ("ls", "ls [a1]", "prints out the content of folder a1"),
    ("cat", "cat s1", "prints out the content of file s1"),
    ("cd", "cd a1", "changes the current path into folder a1"),
    ("pwd", "pwd", "prints out the current path"),
    ("info", "info [a1/s1]", "prints out information about the i-node, or the disk"),
    ("incp", "incp s1 [s2]", "loads host file s1 into the file system (as s2)"),
    ("outcp", "outcp s1 s2", "exports file s1 onto the host as s2"),
    ("load", "load s1", "executes the commands stored in host file s1"),
    ("format", "format 600MB", "formats the disk to the given size (B, KB, MB, GB)"),
    ("slink", "slink s1 s2", "creates a symbolic link s2 pointing at s1"),
    ("readlink", "readlink s1", "prints out the target of symbolic link s1"),
    ("check", "check", "verifies the consistency of the file system"),
    ("help", "help", "prints out help"),
    ("exit", "exit", "closes the application"),
];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("invalid size: {0}")]
    Size(String),
}

/// A parsed shell command with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Copy { src: String, dst: String },
    Move { src: String, dst: String },
    Remove { path: String, recursive: bool },
    MakeDir(String),
    RemoveDir(String),
    Touch(String),
    List(Option<String>),
    Cat(String),
    ChangeDir(String),
    Pwd,
    Info(Option<String>),
    CopyIn { host: PathBuf, dest: Option<String> },
    CopyOut { src: String, host: PathBuf },
    Load(PathBuf),
    Format(u64),
    SymLink { target: String, link: String },
    ReadLink(String),
    Check,
    Help,
    Exit,
}

fn usage(name: &str) -> ParseError {
    let usage = COMMANDS
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|(_, usage, _)| *usage)
        .unwrap_or("help");
    ParseError::Usage(usage)
}

/// Parses sizes such as `600MB`. Units are decimal; a bare number is bytes.
pub fn parse_size(text: &str) -> Result<u64, ParseError> {
    let upper = text.trim().to_ascii_uppercase();
    let (digits, factor) = [("GB", 1_000_000_000), ("MB", 1_000_000), ("KB", 1_000), ("B", 1)]
        .iter()
        .find_map(|(unit, factor)| upper.strip_suffix(unit).map(|d| (d, *factor)))
        .unwrap_or((upper.as_str(), 1));
    digits
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(factor))
        .filter(|&n| n > 0)
        .ok_or_else(|| ParseError::Size(text.to_string()))
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (name, args) = match tokens.split_first() {
            Some((name, args)) => (*name, args),
            None => return Err(ParseError::Unknown(String::new())),
        };
        let owned = |i: usize| args[i].to_string();

        let command = match (name, args.len()) {
            ("cp", 2) => Command::Copy {
                src: owned(0),
                dst: owned(1),
            },
            ("mv", 2) => Command::Move {
                src: owned(0),
                dst: owned(1),
            },
            ("rm", 1) if args[0] != "-r" => Command::Remove {
                path: owned(0),
                recursive: false,
            },
            ("rm", 2) if args[0] == "-r" => Command::Remove {
                path: owned(1),
                recursive: true,
            },
            ("mkdir", 1) => Command::MakeDir(owned(0)),
            ("rmdir", 1) => Command::RemoveDir(owned(0)),
            ("touch", 1) => Command::Touch(owned(0)),
            ("ls", 0) => Command::List(None),
            ("ls", 1) => Command::List(Some(owned(0))),
            ("cat", 1) => Command::Cat(owned(0)),
            ("cd", 1) => Command::ChangeDir(owned(0)),
            ("pwd", 0) => Command::Pwd,
            ("info", 0) => Command::Info(None),
            ("info", 1) => Command::Info(Some(owned(0))),
            ("incp", 1) => Command::CopyIn {
                host: PathBuf::from(args[0]),
                dest: None,
            },
            ("incp", 2) => Command::CopyIn {
                host: PathBuf::from(args[0]),
                dest: Some(owned(1)),
            },
            ("outcp", 2) => Command::CopyOut {
                src: owned(0),
                host: PathBuf::from(args[1]),
            },
            ("load", 1) => Command::Load(PathBuf::from(args[0])),
            ("format", 1) => Command::Format(parse_size(args[0])?),
            ("slink", 2) => Command::SymLink {
                target: owned(0),
                link: owned(1),
            },
            ("readlink", 1) => Command::ReadLink(owned(0)),
            ("check", 0) => Command::Check,
            ("help", 0) => Command::Help,
            ("exit", 0) => Command::Exit,
            (name, _) if COMMANDS.iter().any(|(n, _, _)| *n == name) => return Err(usage(name)),
            (name, _) => return Err(ParseError::Unknown(name.to_string())),
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_use_decimal_units() {
        assert_eq!(parse_size("600MB"), Ok(600_000_000));
        assert_eq!(parse_size("1GB"), Ok(1_000_000_000));
        assert_eq!(parse_size("64kb"), Ok(64_000));
        assert_eq!(parse_size("4096B"), Ok(4096));
        assert_eq!(parse_size("2048"), Ok(2048));
        assert!(parse_size("MB").is_err());
        assert!(parse_size("0").is_err());
        assert!(parse_size("12TB").is_err());
    }

    #[test]
    fn parses_commands_with_arguments() {
        assert_eq!(
            "cp a b".parse::<Command>(),
            Ok(Command::Copy {
                src: "a".into(),
                dst: "b".into()
            })
        );
        assert_eq!(
            "  rm   -r  /dir ".parse::<Command>(),
            Ok(Command::Remove {
                path: "/dir".into(),
                recursive: true
            })
        );
        assert_eq!("ls".parse::<Command>(), Ok(Command::List(None)));
        assert_eq!("format 1MB".parse::<Command>(), Ok(Command::Format(1_000_000)));
        assert_eq!(
            "slink /target /link".parse::<Command>(),
            Ok(Command::SymLink {
                target: "/target".into(),
                link: "/link".into()
            })
        );
        assert_eq!(
            "incp notes.txt".parse::<Command>(),
            Ok(Command::CopyIn {
                host: PathBuf::from("notes.txt"),
                dest: None
            })
        );
    }

    #[test]
    fn wrong_arity_reports_usage() {
        assert_eq!("cp a".parse::<Command>(), Err(ParseError::Usage("cp s1 s2")));
        assert_eq!("pwd x".parse::<Command>(), Err(ParseError::Usage("pwd")));
        assert_eq!("rm -r".parse::<Command>(), Err(ParseError::Usage("rm [-r] s1")));
    }

    #[test]
    fn unknown_commands_are_rejected() {
        assert_eq!(
            "frobnicate".parse::<Command>(),
            Err(ParseError::Unknown("frobnicate".into()))
        );
        assert!("".parse::<Command>().is_err());
    }

    #[test]
    fn every_listed_command_parses_from_its_usage() {
        for (name, usage, _) in COMMANDS {
            let example = usage.replace("[-r] ", "").replace(['[', ']'], "");
            let example = if *name == "info" {
                "info".to_string()
            } else {
                example.replace("a1/s1", "a1")
            };
            assert!(example.parse::<Command>().is_ok(), "{}", example);
        }
    }
}
