//! Progress reporting for long-running build steps.
//!
//! The console bar becomes a no-op when the `progress` feature is disabled.

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};

#[cfg(not(feature = "progress"))]
use self::noop::{ProgressBar, ProgressStyle};

#[cfg(not(feature = "progress"))]
mod noop {
    /// No-op progress bar when `progress` feature is disabled
    #[derive(Clone)]
    pub struct ProgressBar;

    impl ProgressBar {
        pub fn new(_len: u64) -> Self {
            ProgressBar
        }

        pub fn set_style(&self, _style: ProgressStyle) {}
        pub fn set_message(&self, _msg: impl Into<std::borrow::Cow<'static, str>>) {}
        pub fn set_position(&self, _pos: u64) {}
        pub fn finish(&self) {}
    }

    /// No-op progress style
    pub struct ProgressStyle;

    impl ProgressStyle {
        pub fn default_bar() -> Self {
            ProgressStyle
        }

        pub fn template(self, _template: &str) -> Result<Self, std::convert::Infallible> {
            Ok(self)
        }

        pub fn progress_chars(self, _chars: &str) -> Self {
            self
        }
    }
}

enum Sink {
    Hidden,
    Console(ProgressBar),
    Handler(Box<dyn FnMut(u8) + Send>),
}

/// Reports completion as whole percentages, skipping repeated values
pub struct Progress {
    sink: Sink,
    percentage: Option<u8>,
}

impl Progress {
    /// Reporter that discards every update
    pub fn hidden() -> Self {
        Self {
            sink: Sink::Hidden,
            percentage: None,
        }
    }

    /// Reporter that draws a bar on the terminal
    pub fn console(message: &str) -> Self {
        let bar = ProgressBar::new(100);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
        {
            bar.set_style(style.progress_chars("█▓▒░  "));
        }
        bar.set_message(message.to_string());
        Self {
            sink: Sink::Console(bar),
            percentage: None,
        }
    }

    /// Reporter that forwards each new percentage to a callback
    pub fn with_handler(handler: impl FnMut(u8) + Send + 'static) -> Self {
        Self {
            sink: Sink::Handler(Box::new(handler)),
            percentage: None,
        }
    }

    /// Report a completed fraction in `[0, 1]`
    pub fn report(&mut self, fraction: f64) {
        let percentage = (fraction.clamp(0.0, 1.0) * 100.0) as u8;
        if self.percentage != Some(percentage) {
            self.emit(percentage);
        }
    }

    pub fn report_start(&mut self) {
        if self.percentage != Some(0) {
            self.emit(0);
        }
    }

    pub fn report_done(&mut self) {
        if self.percentage != Some(100) {
            self.emit(100);
        }
    }

    fn emit(&mut self, percentage: u8) {
        self.percentage = Some(percentage);
        match &mut self.sink {
            Sink::Hidden => {}
            Sink::Console(bar) => {
                bar.set_position(percentage as u64);
                if percentage == 100 {
                    bar.finish();
                }
            }
            Sink::Handler(handler) => handler(percentage),
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::hidden()
    }
}
