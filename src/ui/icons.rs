//! Shared UI icons.
//!
//! `console::Emoji` falls back to the plain-text form on terminals without emoji support.

use console::Emoji;

// Outcomes
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "[STOP]");
pub static HOURGLASS: Emoji<'_, '_> = Emoji("⌛ ", "[OUT]");

// Stages
pub static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[D]");
pub static WRENCH: Emoji<'_, '_> = Emoji("🔧 ", "[C]");
pub static TEST: Emoji<'_, '_> = Emoji("🧪 ", "[V]");
pub static RETRY: Emoji<'_, '_> = Emoji("🔄 ", "[R]");

pub static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
