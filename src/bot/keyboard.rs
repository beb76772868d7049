//! Reply and inline keyboards for the relay bot.

use teloxide::types::{
    InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup,
};

pub const SCAN_BUTTON: &str = "🔍 Get music from a channel";
pub const HELP_BUTTON: &str = "❓ Help";
pub const STATUS_BUTTON: &str = "📊 Status";

/// Main menu reply keyboard.
pub fn main_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![KeyboardButton::new(SCAN_BUTTON)],
        vec![
            KeyboardButton::new(HELP_BUTTON),
            KeyboardButton::new(STATUS_BUTTON),
        ],
    ])
    .resize_keyboard(true)
}

/// Batch selection keyboard: one button per batch, three per row, plus a
/// back/cancel row.
pub fn batch_keyboard(batch_count: usize) -> InlineKeyboardMarkup {
    let mut keyboard: Vec<Vec<InlineKeyboardButton>> = Vec::new();
    let mut row: Vec<InlineKeyboardButton> = Vec::new();

    for i in 1..=batch_count {
        row.push(InlineKeyboardButton::callback(
            format!("Batch {}", i),
            format!("batch_{}", i),
        ));
        if row.len() == 3 || i == batch_count {
            keyboard.push(std::mem::take(&mut row));
        }
    }

    keyboard.push(vec![InlineKeyboardButton::callback("🔙 Back", "cancel")]);
    InlineKeyboardMarkup::new(keyboard)
}

/// Single cancel button.
pub fn cancel_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback("❌ Cancel", "cancel")]])
}

/// Pause/resume/cancel controls shown while a batch is forwarding, plus a
/// shortcut to the next batch when one exists.
pub fn forward_control_keyboard(batch_index: usize, total_batches: usize) -> InlineKeyboardMarkup {
    let mut keyboard = vec![
        vec![
            InlineKeyboardButton::callback("⏸ Pause", "pause"),
            InlineKeyboardButton::callback("▶️ Resume", "resume"),
            InlineKeyboardButton::callback("❌ Cancel", "cancel"),
        ],
        vec![InlineKeyboardButton::callback("📊 Status", "status")],
    ];

    if batch_index < total_batches {
        keyboard.push(vec![InlineKeyboardButton::callback(
            "📁 Forward next batch",
            format!("batch_{}", batch_index + 1),
        )]);
    }

    InlineKeyboardMarkup::new(keyboard)
}

/// Shown when a round finished but older messages remain.
pub fn continue_fetch_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback(
            "🔄 Fetch more files",
            "continue_fetch",
        )],
        vec![InlineKeyboardButton::callback(
            "✅ Done, show batches",
            "show_batches",
        )],
        vec![InlineKeyboardButton::callback("❌ Cancel", "cancel")],
    ])
}
