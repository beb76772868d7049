//! Batch organization and user-facing summary text.

/// Partition `items` into contiguous groups of at most `size`, preserving
/// order; the last group may be shorter. `size` must be >= 1.
pub fn partition<T>(items: &[T], size: usize) -> Vec<&[T]> {
    assert!(size >= 1, "batch size must be at least 1");
    items.chunks(size).collect()
}

/// One line per batch plus a selection prompt.
pub fn batch_summary<T>(batches: &[&[T]]) -> String {
    let mut result = String::from("📂 Music batches:\n\n");
    for (i, batch) in batches.iter().enumerate() {
        result.push_str(&format!(
            "📁 Batch {}: {} music files\n",
            i + 1,
            batch.len()
        ));
    }
    result.push_str("\n🔍 Pick a batch number to forward it");
    result
}

/// Placeholder total used when the scan has no real ceiling; anything this
/// large is rendered as an unbounded scan.
const UNBOUNDED_TOTAL: usize = 90_000;

/// Progress line for the scan status message.
pub fn progress_line(total: usize, processed: usize) -> String {
    if total > UNBOUNDED_TOTAL {
        return format!("🔄 Processing: {} messages (no limit)", processed);
    }

    let percentage = if total == 0 {
        0.0
    } else if processed > total {
        100.0
    } else {
        (processed as f64 / total as f64) * 100.0
    };

    format!("🔄 Processing: {}/{} ({:.1}%)", processed, total, percentage)
}
