use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use clusterfs::{DirEntry, FileSystem, FsError, InodeKind};
use log::{debug, info, warn};
use thiserror::Error;

use crate::command::{Command, ParseError, COMMANDS};

/// Nested `load` commands followed before giving up.
const MAX_SCRIPT_DEPTH: usize = 8;

#[derive(Error, Debug)]
pub enum ShellError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("cannot read script {path}: {source}")]
    Script { path: PathBuf, source: io::Error },
    #[error("scripts nested deeper than {0} levels")]
    ScriptDepth(usize),
    #[error("cannot read input: {0}")]
    Input(#[source] io::Error),
    /// Writing to the terminal failed; the shell cannot continue.
    #[error("output failed: {0}")]
    Output(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Reads commands line by line and runs them against a file system, writing
/// results to `out`.
pub struct Shell<W: Write> {
    fs: FileSystem,
    out: W,
    depth: usize,
}

fn kind_marker(kind: InodeKind) -> char {
    match kind {
        InodeKind::Directory => 'd',
        InodeKind::File => '-',
        InodeKind::Symlink => 'l',
    }
}

fn format_entry(entry: &DirEntry) -> String {
    let mut line = format!(
        "{} {:<27} {:>10} B  i-node {}",
        kind_marker(entry.kind),
        entry.name,
        entry.size,
        entry.inode
    );
    if let Some(target) = &entry.link_target {
        line.push_str(" -> ");
        line.push_str(target);
    }
    line
}

impl<W: Write> Shell<W> {
    pub fn new(fs: FileSystem, out: W) -> Self {
        Self { fs, out, depth: 0 }
    }

    #[cfg(test)]
    pub fn file_system(&mut self) -> &mut FileSystem {
        &mut self.fs
    }

    #[cfg(test)]
    pub fn into_output(self) -> W {
        self.out
    }

    fn say(&mut self, text: &str) -> Result<(), ShellError> {
        writeln!(self.out, "{}", text).map_err(ShellError::Output)
    }

    fn prompt(&mut self) -> Result<(), ShellError> {
        let cwd = self
            .fs
            .current_path()
            .unwrap_or_else(|_| "(unformatted)".to_string());
        write!(self.out, "{}> ", cwd)
            .and_then(|_| self.out.flush())
            .map_err(ShellError::Output)
    }

    /// Runs commands from `input` until it is exhausted or `exit` is entered.
    /// Lines that are not valid UTF-8 are reported and skipped.
    pub fn run<R: BufRead>(&mut self, input: R, interactive: bool) -> Result<(), ShellError> {
        if interactive {
            self.prompt()?;
        }
        for line in input.split(b'\n') {
            let line = line.map_err(ShellError::Input)?;
            match String::from_utf8(line) {
                Ok(line) => {
                    let line = line.strip_suffix('\r').unwrap_or(&line);
                    if !interactive {
                        self.say(line)?;
                    }
                    if self.execute_line(line)? == Flow::Exit {
                        break;
                    }
                }
                Err(err) => {
                    warn!("skipping input line: {}", err);
                    self.say("line is not valid UTF-8, skipped")?;
                }
            }
            if interactive {
                self.prompt()?;
            }
        }
        Ok(())
    }

    /// Flushes the image when one is mounted. A failure is printed, not returned.
    pub fn sync(&mut self) -> Result<(), ShellError> {
        if !self.fs.is_formatted() {
            return Ok(());
        }
        if let Err(err) = self.fs.sync() {
            self.say(&err.to_string())?;
        }
        Ok(())
    }

    /// Parses and runs one line. Command failures are printed, only output errors
    /// are returned.
    pub fn execute_line(&mut self, line: &str) -> Result<Flow, ShellError> {
        if line.trim().is_empty() {
            return Ok(Flow::Continue);
        }
        let result = line
            .parse::<Command>()
            .map_err(ShellError::from)
            .and_then(|command| self.execute(command));
        match result {
            Ok(flow) => Ok(flow),
            Err(err @ ShellError::Output(_)) => Err(err),
            Err(err) => {
                debug!("{:?} failed: {}", line, err);
                self.say(&err.to_string())?;
                Ok(Flow::Continue)
            }
        }
    }

    pub fn execute(&mut self, command: Command) -> Result<Flow, ShellError> {
        match command {
            Command::Copy { src, dst } => {
                self.fs.copy(&src, &dst)?;
                self.say("OK")?;
            }
            Command::Move { src, dst } => {
                self.fs.rename(&src, &dst)?;
                self.say("OK")?;
            }
            Command::Remove { path, recursive } => {
                self.fs.remove(&path, recursive)?;
                self.say("OK")?;
            }
            Command::MakeDir(path) => {
                self.fs.create(&path, InodeKind::Directory)?;
                self.say("OK")?;
            }
            Command::RemoveDir(path) => {
                self.fs.remove_dir(&path)?;
                self.say("OK")?;
            }
            Command::Touch(path) => {
                self.fs.create(&path, InodeKind::File)?;
                self.say("OK")?;
            }
            Command::List(path) => {
                for entry in self.fs.list(path.as_deref())? {
                    self.say(&format_entry(&entry))?;
                }
            }
            Command::Cat(path) => {
                let content = self.fs.read_file(&path)?;
                self.say(&String::from_utf8_lossy(&content))?;
            }
            Command::ChangeDir(path) => {
                self.fs.change_directory(&path)?;
                self.say("OK")?;
            }
            Command::Pwd => {
                let cwd = self.fs.current_path()?;
                self.say(&cwd)?;
            }
            Command::Info(None) => {
                let info = self.fs.info()?;
                self.say(&info.to_string())?;
            }
            Command::Info(Some(path)) => {
                let stat = self.fs.stat(&path)?;
                self.say(&format!("{} - {}", path, stat))?;
            }
            Command::CopyIn { host, dest } => {
                self.fs.copy_in(&host, dest.as_deref())?;
                self.say("OK")?;
            }
            Command::CopyOut { src, host } => {
                self.fs.copy_out(&src, &host)?;
                self.say("OK")?;
            }
            Command::Load(script) => {
                self.load(&script)?;
                self.say("OK")?;
            }
            Command::Format(size) => {
                self.fs.format(size)?;
                info!("formatted image to {} bytes", size);
                self.say("OK")?;
            }
            Command::SymLink { target, link } => {
                self.fs.make_symbolic_link(&link, &target)?;
                self.say("OK")?;
            }
            Command::ReadLink(path) => {
                let target = self.fs.read_link(&path)?;
                self.say(&target)?;
            }
            Command::Check => {
                let report = self.fs.check()?;
                self.say(&report.to_string())?;
            }
            Command::Help => {
                for (_, usage, description) in COMMANDS {
                    self.say(&format!("{:<14} - {}", usage, description))?;
                }
            }
            Command::Exit => {
                self.sync()?;
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }

    /// Executes every line of a host file, echoing each one first.
    pub fn load(&mut self, script: &Path) -> Result<(), ShellError> {
        if self.depth >= MAX_SCRIPT_DEPTH {
            return Err(ShellError::ScriptDepth(MAX_SCRIPT_DEPTH));
        }
        let file = File::open(script).map_err(|source| ShellError::Script {
            path: script.to_path_buf(),
            source,
        })?;
        self.depth += 1;
        let result = self.run(BufReader::new(file), false);
        self.depth -= 1;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shell() -> (TempDir, Shell<Vec<u8>>) {
        let dir = tempfile::tempdir().unwrap();
        let mut fs = FileSystem::open(dir.path().join("shell.img")).unwrap();
        fs.format(1_000_000).unwrap();
        (dir, Shell::new(fs, Vec::new()))
    }

    fn output(shell: Shell<Vec<u8>>) -> String {
        String::from_utf8(shell.into_output()).unwrap()
    }

    #[test]
    fn mutating_commands_print_ok() {
        let (_dir, mut sh) = shell();
        assert_eq!(sh.execute_line("mkdir /a").unwrap(), Flow::Continue);
        sh.execute_line("touch /a/f").unwrap();
        sh.execute_line("cd /a").unwrap();
        sh.execute_line("pwd").unwrap();
        assert_eq!(output(sh), "OK\nOK\nOK\n/a\n");
    }

    #[test]
    fn failures_print_the_error_and_continue() {
        let (_dir, mut sh) = shell();
        assert_eq!(sh.execute_line("cd /nowhere").unwrap(), Flow::Continue);
        sh.execute_line("bogus").unwrap();
        let out = output(sh);
        assert!(out.contains("no such file or directory: /nowhere"));
        assert!(out.contains("unknown command: bogus"));
    }

    #[test]
    fn exit_stops_the_loop() {
        let (_dir, mut sh) = shell();
        let input = "mkdir /x\nexit\nmkdir /y\n";
        sh.run(input.as_bytes(), false).unwrap();
        assert!(sh.file_system().resolve_path("/x", false).is_ok());
        assert!(sh.file_system().resolve_path("/y", false).is_err());
    }

    #[test]
    fn exit_leaves_image_readable_by_another_handle() {
        let (dir, mut sh) = shell();
        sh.run("mkdir /kept\nexit\n".as_bytes(), false).unwrap();

        let mut reopened = FileSystem::open(dir.path().join("shell.img")).unwrap();
        assert!(reopened.resolve_path("/kept", false).is_ok());
        assert!(output(sh).ends_with("exit\n"));
    }

    #[test]
    fn exit_on_unformatted_image_just_stops() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileSystem::open(dir.path().join("none.img")).unwrap();
        let mut sh = Shell::new(fs, Vec::new());
        assert_eq!(sh.execute_line("exit").unwrap(), Flow::Exit);
        assert!(output(sh).is_empty());
    }

    #[test]
    fn invalid_utf8_line_is_skipped() {
        let (_dir, mut sh) = shell();
        let input: &[u8] = b"mkdir /a\n\xff\xfe\nmkdir /b\r\n";

        sh.run(input, false).unwrap();

        assert!(sh.file_system().resolve_path("/a", false).is_ok());
        assert!(sh.file_system().resolve_path("/b", false).is_ok());
        assert!(output(sh).contains("line is not valid UTF-8, skipped\n"));
    }

    #[test]
    fn load_runs_script_lines() {
        let (dir, mut sh) = shell();
        let host = dir.path().join("hello.txt");
        std::fs::write(&host, "hello").unwrap();
        let script = dir.path().join("script.txt");
        std::fs::write(
            &script,
            format!("mkdir /s\nincp {} /s\nslink /s/hello.txt /s/ln\ncat /s/ln\n", host.display()),
        )
        .unwrap();

        sh.execute_line(&format!("load {}", script.display())).unwrap();

        let out = output(sh);
        assert!(out.contains("mkdir /s\nOK\n"));
        assert!(out.contains("cat /s/ln\nhello\n"));
        assert!(out.ends_with("OK\n"));
    }

    #[test]
    fn self_loading_script_is_cut_off() {
        let (dir, mut sh) = shell();
        let script = dir.path().join("loop.txt");
        std::fs::write(&script, format!("load {}\n", script.display())).unwrap();

        sh.execute_line(&format!("load {}", script.display())).unwrap();

        assert!(output(sh).contains("scripts nested deeper than 8 levels"));
    }

    #[test]
    fn listing_marks_kinds_and_link_targets() {
        let (_dir, mut sh) = shell();
        sh.execute_line("mkdir /d").unwrap();
        sh.execute_line("slink /d /l").unwrap();
        sh.execute_line("ls /").unwrap();
        let out = output(sh);
        assert!(out.lines().any(|l| l.starts_with("d d ")));
        assert!(out.lines().any(|l| l.starts_with("l l ") && l.ends_with("-> /d")));
    }
}
