//! Terminal styles, registered once through `once_cell::sync::Lazy`.
//! `console` drops the colors by itself when stdout is not a terminal.

use console::Style;
use once_cell::sync::Lazy;

pub static INFO: Lazy<Style> = Lazy::new(|| Style::new().dim());
pub static SUCCESS: Lazy<Style> = Lazy::new(|| Style::new().green());
pub static WARNING: Lazy<Style> = Lazy::new(|| Style::new().yellow().bold());
pub static ERROR: Lazy<Style> = Lazy::new(|| Style::new().red().bold());

pub static ID: Lazy<Style> = Lazy::new(|| Style::new().yellow());
pub static TITLE: Lazy<Style> = Lazy::new(|| Style::new().bold());
pub static STATUS: Lazy<Style> = Lazy::new(|| Style::new().cyan());
pub static TIME: Lazy<Style> = Lazy::new(|| Style::new().dim().italic());
pub static PATH: Lazy<Style> = Lazy::new(|| Style::new().underlined());
