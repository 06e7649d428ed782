use std::fmt::Write;
use std::time::Instant;
use indicatif::{ProgressBar, ProgressState, ProgressStyle};

/// Frame counter shown while the encoder writes output.
pub struct Progress {
    bar: ProgressBar,
    start: Instant,
    paused: bool,
}

impl Progress {

    pub fn new(total: usize, header: &str) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(Self::style(header));
        Self::with_bar(bar)
    }

    /// A progress display that draws nothing.
    pub fn hidden(total: usize) -> Self {
        let bar = ProgressBar::hidden();
        bar.set_length(total as u64);
        Self::with_bar(bar)
    }

    fn with_bar(bar: ProgressBar) -> Self {
        let progress = Self { bar, start: Instant::now(), paused: false };
        progress.update(0, 0);
        progress
    }

    fn style(header: &str) -> ProgressStyle {
        let progress_template = "[{elapsed_precise}] [{eta}] [{wide_bar:.white/green}] {pos}/{len} {percent} {msg}";
        let template = if header.is_empty() {
            progress_template.to_string()
        } else {
            format!("{}\n{}", header, progress_template)
        };
        ProgressStyle::default_bar()
            .template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░-")
            .with_key("eta", |state: &ProgressState, w: &mut dyn Write| {
                let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
            })
            .with_key("percent", |state: &ProgressState, w: &mut dyn Write| {
                let _ = write!(w, "({:.0}%)", state.fraction() * 100.0);
            })
    }

    fn update(&self, position: usize, reused: usize) {
        let elapsed = self.start.elapsed().as_secs_f64();
        let frame_rate = if elapsed > 0.0 { position as f64 / elapsed } else { 0.0 };
        self.bar.set_position(position as u64);
        self.bar.set_message(format!("[reused: {}] [fps: {:.1}]", reused, frame_rate));
    }

    pub fn advance(&mut self, position: usize, reused: usize) {
        self.set_paused(false);
        self.update(position, reused);
    }

    pub fn set_paused(&mut self, paused: bool) {
        if paused == self.paused {
            return;
        }
        self.paused = paused;
        if paused {
            self.bar.set_message("[paused]");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn length(&self) -> Option<u64> {
        self.bar.length()
    }

    pub fn finish(&self) {
        self.bar.finish();
    }

    pub fn abandon(&self) {
        self.bar.abandon();
    }
}
