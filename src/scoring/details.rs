use std::fmt::Write;

/// Human-readable audit trail for one scoring pass over one POI.
///
/// Every multiplicative factor appends a line; the result is stored on the
/// POI for debugging and the UI detail pane.
#[derive(Debug, Default)]
pub struct ScoreLog {
    lines: String,
}

impl ScoreLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note(&mut self, text: impl AsRef<str>) {
        if !self.lines.is_empty() {
            self.lines.push('\n');
        }
        self.lines.push_str(text.as_ref());
    }

    /// Record a multiplicative factor with its explanation.
    pub fn factor(&mut self, label: &str, detail: &str, multiplier: f64) {
        if !self.lines.is_empty() {
            self.lines.push('\n');
        }
        if detail.is_empty() {
            let _ = write!(self.lines, "{}: x{:.2}", label, multiplier);
        } else {
            let _ = write!(self.lines, "{}: {} -> x{:.2}", label, detail, multiplier);
        }
    }

    pub fn finish(self) -> String {
        self.lines
    }
}
