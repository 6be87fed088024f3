//! Shared UI icons and emojis.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN]");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "[STOP]");

// Reconciliation
pub static TRASH: Emoji<'_, '_> = Emoji("🗑️  ", "-");
pub static RENAME: Emoji<'_, '_> = Emoji("🔄 ", "~");

// Dispatch
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
