//! Console reporting handed to every pipeline stage.
//!
//! Stages never look at global verbosity: they ask their `Reporter` for
//! progress bars and per-file detail lines.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info};

const BYTES_TEMPLATE: &str =
    "{spinner:.green} {msg} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {bytes_per_sec} ETA: {eta}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg} [{elapsed_precise}] {bytes} {bytes_per_sec}";
const ITEMS_TEMPLATE: &str = "{msg} [{wide_bar:.cyan/blue}] {pos}/{len}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Verbose,
    Quiet,
    /// No bars at all.
    #[cfg(test)]
    Silent,
}

#[derive(Debug, Clone, Copy)]
pub struct Reporter {
    mode: Mode,
}

impl Reporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            mode: if verbose { Mode::Verbose } else { Mode::Quiet },
        }
    }

    #[cfg(test)]
    pub fn silent() -> Self {
        Self { mode: Mode::Silent }
    }

    pub fn is_verbose(&self) -> bool {
        self.mode == Mode::Verbose
    }

    /// Per-file detail: info when verbose, debug otherwise.
    pub fn detail(&self, msg: &str) {
        if self.is_verbose() {
            info!("{msg}");
        } else {
            debug!("{msg}");
        }
    }

    /// Byte progress for one download. Falls back to a spinner when the
    /// server did not announce a length.
    pub fn bytes_bar(&self, len: Option<u64>, name: &str) -> ProgressBar {
        let pb = match len {
            Some(len) => ProgressBar::new(len).with_style(style(BYTES_TEMPLATE)),
            None => ProgressBar::new_spinner().with_style(style(SPINNER_TEMPLATE)),
        };
        pb.set_draw_target(self.draw_target(Mode::Verbose));
        pb.with_message(name.to_string())
    }

    /// Stage-level counter (tiles downloaded, files rasterized). Shown
    /// even when not verbose.
    pub fn items_bar(&self, len: usize, msg: &str) -> ProgressBar {
        let pb = ProgressBar::new(len as u64).with_style(style(ITEMS_TEMPLATE));
        pb.set_draw_target(self.draw_target(Mode::Quiet));
        pb.with_message(msg.to_string())
    }

    fn draw_target(&self, needed: Mode) -> ProgressDrawTarget {
        let visible = match self.mode {
            #[cfg(test)]
            Mode::Silent => false,
            Mode::Verbose => true,
            Mode::Quiet => needed == Mode::Quiet,
        };

        if visible {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        }
    }
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}
