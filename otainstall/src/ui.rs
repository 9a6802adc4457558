// SPDX-FileCopyrightText: 2026 otainstall contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    io::{self, Write},
    sync::Mutex,
};

use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Background {
    None,
    Installing,
}

/// The capabilities the install flow needs from the recovery UI. The real
/// screen-drawing UI lives outside this crate; implementations here only need
/// to honor the call sequence.
pub trait RecoveryUi {
    fn set_background(&self, background: Background);

    /// Show a determinate progress bar segment spanning `fraction` of the
    /// total bar, filling over `seconds` seconds. Zero seconds means the
    /// segment is driven manually via [`Self::set_progress`].
    fn show_progress(&self, fraction: f32, seconds: i32);

    /// Set the progress within the current segment (0.0 - 1.0).
    fn set_progress(&self, fraction: f32);

    /// Append text to the on-screen log.
    fn print(&self, text: &str);

    /// Allow or forbid user-initiated reboots while an install is running.
    fn set_enable_reboot(&self, enable: bool);
}

/// Text-only UI for running outside a graphical recovery. Printed text goes
/// to stdout; everything else is visible at debug level.
pub struct TextUi;

impl RecoveryUi for TextUi {
    fn set_background(&self, background: Background) {
        debug!("UI background: {background:?}");
    }

    fn show_progress(&self, fraction: f32, seconds: i32) {
        debug!("UI progress segment: {fraction} over {seconds}s");
    }

    fn set_progress(&self, fraction: f32) {
        debug!("UI progress: {fraction}");
    }

    fn print(&self, text: &str) {
        print!("{text}");
        // Print failures are not actionable during an install.
        let _ = io::stdout().flush();
    }

    fn set_enable_reboot(&self, enable: bool) {
        debug!("UI reboot enabled: {enable}");
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum UiEvent {
    Background(Background),
    ShowProgress(f32, i32),
    SetProgress(f32),
    Print(String),
    EnableReboot(bool),
}

/// UI that records every call, in order. Tests substitute this for [`TextUi`]
/// and assert on the event stream.
#[derive(Debug, Default)]
pub struct RecordingUi {
    events: Mutex<Vec<UiEvent>>,
}

impl RecordingUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().unwrap().clone()
    }

    /// All `ui_print`-style text, concatenated.
    pub fn printed(&self) -> String {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                UiEvent::Print(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: UiEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl RecoveryUi for RecordingUi {
    fn set_background(&self, background: Background) {
        self.push(UiEvent::Background(background));
    }

    fn show_progress(&self, fraction: f32, seconds: i32) {
        self.push(UiEvent::ShowProgress(fraction, seconds));
    }

    fn set_progress(&self, fraction: f32) {
        self.push(UiEvent::SetProgress(fraction));
    }

    fn print(&self, text: &str) {
        self.push(UiEvent::Print(text.to_owned()));
    }

    fn set_enable_reboot(&self, enable: bool) {
        self.push(UiEvent::EnableReboot(enable));
    }
}
