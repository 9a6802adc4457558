// SPDX-FileCopyrightText: 2026 otainstall contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Supervises the external update applier.
//!
//! The applier reports status over a pipe, one command per line. The write
//! end is inherited across exec (its fd number is part of the applier's
//! argument vector); the read end stays in the parent, which consumes lines
//! until EOF and only then reaps the child. That ordering guarantees every
//! command's side effect lands before the terminal status is computed.

use std::{
    ffi::OsString,
    fs::File,
    io::{self, BufRead, BufReader},
    os::{
        fd::{AsRawFd, OwnedFd, RawFd},
        unix::process::CommandExt,
    },
    process::Command,
};

use rustix::{fs::Mode, io::FdFlags, process::umask};
use thiserror::Error;
use tracing::{error, warn};

use crate::{
    install::{InstallResult, VERIFICATION_PROGRESS_FRACTION},
    ui::{Background, RecoveryUi},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to create status pipe")]
    Pipe(#[source] io::Error),
    #[error("Failed to fork update binary")]
    Spawn(#[source] io::Error),
    #[error("Failed to reap update binary")]
    Wait(#[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// The status channel between the applier and the supervisor. Only the
/// parent-side read end is close-on-exec; the write end must survive exec so
/// the applier can write to it.
pub struct StatusPipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl StatusPipe {
    pub fn new() -> Result<Self> {
        let (read, write) = rustix::pipe::pipe()
            .map_err(|e| Error::Pipe(e.into()))?;
        rustix::io::fcntl_setfd(&read, FdFlags::CLOEXEC)
            .map_err(|e| Error::Pipe(e.into()))?;

        Ok(Self { read, write })
    }

    /// The fd number the applier should write to. Valid in the child because
    /// fd numbers survive fork unchanged.
    pub fn write_fd(&self) -> RawFd {
        self.write.as_raw_fd()
    }
}

/// One line of the applier's status protocol.
#[derive(Clone, Debug, PartialEq)]
enum UpdaterCommand<'a> {
    /// Fill the next `fraction` of the progress bar over `seconds` seconds.
    Progress { fraction: f32, seconds: i32 },
    /// Set the position within the current progress segment.
    SetProgress { fraction: f32 },
    /// Display text on screen; no argument means a bare newline.
    UiPrint(&'a str),
    /// Wipe the cache partition after a successful install.
    WipeCache,
    /// Turn off the text display.
    ClearDisplay,
    /// Allow the user to reboot mid-install.
    EnableReboot,
    /// Re-drive the whole install.
    RetryUpdate,
    /// Append a line to the install log.
    Log(&'a str),
}

#[derive(Debug, Error, PartialEq)]
enum ParseError {
    #[error("unknown command [{0}]")]
    UnknownCommand(String),
    #[error("command [{0}] is missing arguments")]
    MissingArgument(&'static str),
    #[error("command [{0}] has invalid argument {1:?}")]
    InvalidArgument(&'static str, String),
}

impl<'a> UpdaterCommand<'a> {
    fn parse(line: &'a str) -> std::result::Result<Self, ParseError> {
        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest),
            None => (line, ""),
        };

        let fraction_arg = |name, value: &str| {
            value
                .parse::<f32>()
                .map_err(|_| ParseError::InvalidArgument(name, value.to_owned()))
        };

        match command {
            "progress" => {
                let mut args = rest.split_ascii_whitespace();
                let (Some(fraction), Some(seconds)) = (args.next(), args.next()) else {
                    return Err(ParseError::MissingArgument("progress"));
                };

                Ok(Self::Progress {
                    fraction: fraction_arg("progress", fraction)?,
                    seconds: seconds.parse().map_err(|_| {
                        ParseError::InvalidArgument("progress", seconds.to_owned())
                    })?,
                })
            }
            "set_progress" => {
                let Some(fraction) = rest.split_ascii_whitespace().next() else {
                    return Err(ParseError::MissingArgument("set_progress"));
                };

                Ok(Self::SetProgress {
                    fraction: fraction_arg("set_progress", fraction)?,
                })
            }
            "ui_print" => Ok(Self::UiPrint(rest)),
            "wipe_cache" => Ok(Self::WipeCache),
            "clear_display" => Ok(Self::ClearDisplay),
            "enable_reboot" => Ok(Self::EnableReboot),
            "retry_update" => Ok(Self::RetryUpdate),
            "log" => {
                if rest.is_empty() {
                    return Err(ParseError::MissingArgument("log"));
                }

                Ok(Self::Log(rest))
            }
            other => Err(ParseError::UnknownCommand(other.to_owned())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChildOutcome {
    pub result: InstallResult,
    pub wipe_cache: bool,
}

struct Supervisor<'a> {
    ui: &'a dyn RecoveryUi,
    log_buffer: &'a mut Vec<String>,
    wipe_cache: bool,
    retry_update: bool,
}

impl Supervisor<'_> {
    fn apply(&mut self, command: UpdaterCommand) {
        match command {
            UpdaterCommand::Progress { fraction, seconds } => {
                self.ui
                    .show_progress(fraction * (1.0 - VERIFICATION_PROGRESS_FRACTION), seconds);
            }
            UpdaterCommand::SetProgress { fraction } => self.ui.set_progress(fraction),
            UpdaterCommand::UiPrint(text) => self.ui.print(&format!("{text}\n")),
            UpdaterCommand::WipeCache => self.wipe_cache = true,
            UpdaterCommand::ClearDisplay => self.ui.set_background(Background::None),
            UpdaterCommand::EnableReboot => self.ui.set_enable_reboot(true),
            UpdaterCommand::RetryUpdate => self.retry_update = true,
            UpdaterCommand::Log(text) => self.log_buffer.push(text.to_owned()),
        }
    }
}

/// Run the applier and consume its status stream until EOF, then reap it.
///
/// A `retry_update` request wins over the exit code; otherwise any abnormal
/// or nonzero exit is an error. Malformed and unknown status lines are
/// logged and skipped: the applier owns authoritative success via its exit
/// code, not via protocol hygiene.
pub fn run_applier(
    ui: &dyn RecoveryUi,
    argv: &[OsString],
    pipe: StatusPipe,
    log_buffer: &mut Vec<String>,
) -> Result<ChildOutcome> {
    let mut command = Command::new(&argv[0]);
    command.args(&argv[1..]);

    // Between fork and exec: applier packages expect the traditional file
    // creation mask.
    unsafe {
        command.pre_exec(|| {
            umask(Mode::from_raw_mode(0o022));
            Ok(())
        });
    }

    let mut child = command.spawn().map_err(Error::Spawn)?;

    let StatusPipe { read, write } = pipe;
    // The child owns the write end now. Dropping ours is what makes the read
    // loop below terminate when the child exits.
    drop(write);

    let mut supervisor = Supervisor {
        ui,
        log_buffer,
        wipe_cache: false,
        retry_update: false,
    };

    let reader = BufReader::new(File::from(read));
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to read from update binary: {e}");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match UpdaterCommand::parse(&line) {
            Ok(command) => supervisor.apply(command),
            Err(e) => error!("{e}"),
        }
    }

    let status = child.wait().map_err(Error::Wait)?;

    let result = if supervisor.retry_update {
        InstallResult::Retry
    } else if !status.success() {
        error!("Error in {:?} ({status})", argv[0]);
        InstallResult::Error
    } else {
        InstallResult::Success
    };

    Ok(ChildOutcome {
        result,
        wipe_cache: supervisor.wipe_cache,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::ui::{RecordingUi, UiEvent};

    use super::*;

    #[test]
    fn parse_all_commands() {
        assert_eq!(
            UpdaterCommand::parse("progress 0.5 10").unwrap(),
            UpdaterCommand::Progress {
                fraction: 0.5,
                seconds: 10,
            },
        );
        assert_eq!(
            UpdaterCommand::parse("set_progress 0.25").unwrap(),
            UpdaterCommand::SetProgress { fraction: 0.25 },
        );
        assert_eq!(
            UpdaterCommand::parse("ui_print hello world").unwrap(),
            UpdaterCommand::UiPrint("hello world"),
        );
        assert_eq!(
            UpdaterCommand::parse("ui_print").unwrap(),
            UpdaterCommand::UiPrint(""),
        );
        assert_eq!(
            UpdaterCommand::parse("wipe_cache").unwrap(),
            UpdaterCommand::WipeCache,
        );
        assert_eq!(
            UpdaterCommand::parse("clear_display").unwrap(),
            UpdaterCommand::ClearDisplay,
        );
        assert_eq!(
            UpdaterCommand::parse("enable_reboot").unwrap(),
            UpdaterCommand::EnableReboot,
        );
        assert_eq!(
            UpdaterCommand::parse("retry_update").unwrap(),
            UpdaterCommand::RetryUpdate,
        );
        assert_eq!(
            UpdaterCommand::parse("log step=1 ok").unwrap(),
            UpdaterCommand::Log("step=1 ok"),
        );
    }

    #[test]
    fn parse_malformed_lines() {
        assert_matches!(
            UpdaterCommand::parse("progress"),
            Err(ParseError::MissingArgument("progress"))
        );
        assert_matches!(
            UpdaterCommand::parse("progress 0.5"),
            Err(ParseError::MissingArgument("progress"))
        );
        assert_matches!(
            UpdaterCommand::parse("progress abc 10"),
            Err(ParseError::InvalidArgument("progress", _))
        );
        assert_matches!(
            UpdaterCommand::parse("set_progress"),
            Err(ParseError::MissingArgument("set_progress"))
        );
        assert_matches!(
            UpdaterCommand::parse("log"),
            Err(ParseError::MissingArgument("log"))
        );
        assert_matches!(
            UpdaterCommand::parse("self_destruct now"),
            Err(ParseError::UnknownCommand(c)) if c == "self_destruct"
        );
    }

    fn run_script(script: &str) -> (ChildOutcome, RecordingUi, Vec<String>) {
        let ui = RecordingUi::new();
        let mut log_buffer = vec![];

        let pipe = StatusPipe::new().unwrap();
        let script = script.replace("$FD", &pipe.write_fd().to_string());
        let argv = vec![
            OsString::from("/bin/sh"),
            OsString::from("-c"),
            OsString::from(script),
        ];

        let outcome = run_applier(&ui, &argv, pipe, &mut log_buffer).unwrap();

        (outcome, ui, log_buffer)
    }

    #[test]
    fn success_with_ui_effects() {
        let (outcome, ui, _) = run_script(
            "echo 'progress 0.5 10' >&$FD; \
             echo 'ui_print hi' >&$FD; \
             echo 'set_progress 1.0' >&$FD; \
             exit 0",
        );

        assert_eq!(
            outcome,
            ChildOutcome {
                result: InstallResult::Success,
                wipe_cache: false,
            },
        );
        assert_eq!(
            ui.events(),
            vec![
                UiEvent::ShowProgress(0.5 * 0.75, 10),
                UiEvent::Print("hi\n".to_owned()),
                UiEvent::SetProgress(1.0),
            ],
        );
    }

    #[test]
    fn retry_wins_over_exit_code() {
        let (outcome, _, _) = run_script("echo retry_update >&$FD; exit 0");
        assert_eq!(outcome.result, InstallResult::Retry);

        let (outcome, _, _) = run_script("echo retry_update >&$FD; exit 7");
        assert_eq!(outcome.result, InstallResult::Retry);
    }

    #[test]
    fn nonzero_exit_is_error() {
        let (outcome, _, _) = run_script("echo 'ui_print almost' >&$FD; exit 1");
        assert_eq!(outcome.result, InstallResult::Error);
    }

    #[test]
    fn wipe_cache_is_reported() {
        let (outcome, _, _) = run_script("echo wipe_cache >&$FD; exit 0");

        assert_eq!(
            outcome,
            ChildOutcome {
                result: InstallResult::Success,
                wipe_cache: true,
            },
        );
    }

    #[test]
    fn log_lines_are_buffered() {
        let (_, _, log_buffer) = run_script(
            "echo 'log first line' >&$FD; echo 'log second line' >&$FD; exit 0",
        );

        assert_eq!(log_buffer, vec!["first line", "second line"]);
    }

    #[test]
    fn malformed_and_unknown_lines_are_skipped() {
        let (outcome, ui, _) = run_script(
            "echo 'progress' >&$FD; \
             echo 'teleport home' >&$FD; \
             echo 'ui_print still here' >&$FD; \
             exit 0",
        );

        assert_eq!(outcome.result, InstallResult::Success);
        assert_eq!(ui.events(), vec![UiEvent::Print("still here\n".to_owned())]);
    }

    #[test]
    fn clear_display_and_enable_reboot() {
        let (_, ui, _) =
            run_script("echo clear_display >&$FD; echo enable_reboot >&$FD; exit 0");

        assert_eq!(
            ui.events(),
            vec![
                UiEvent::Background(Background::None),
                UiEvent::EnableReboot(true),
            ],
        );
    }

    #[test]
    fn spawn_failure() {
        let ui = RecordingUi::new();
        let mut log_buffer = vec![];
        let pipe = StatusPipe::new().unwrap();
        let argv = vec![OsString::from("/nonexistent/update_binary")];

        assert_matches!(
            run_applier(&ui, &argv, pipe, &mut log_buffer),
            Err(Error::Spawn(_))
        );
    }
}
