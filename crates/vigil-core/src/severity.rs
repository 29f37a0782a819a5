use crate::domain::Severity;

/// Map elevation over baseline (percent) to a severity level.
///
/// | elevation | severity |
/// |---|---|
/// | >= 80 | critical |
/// | 50..80 | severe |
/// | 30..50 | moderate |
/// | 20..30 | mild |
///
/// Returns `None` below 20%, where no run could have been flagged.
pub fn classify_severity(percentage_above: f64) -> Option<Severity> {
    if !percentage_above.is_finite() {
        return None;
    }
    if percentage_above >= 80.0 {
        Some(Severity::Critical)
    } else if percentage_above >= 50.0 {
        Some(Severity::Severe)
    } else if percentage_above >= 30.0 {
        Some(Severity::Moderate)
    } else if percentage_above >= 20.0 {
        Some(Severity::Mild)
    } else {
        None
    }
}
