//! # Display
//!
//! 16x2 character display and the status page rendered on it.

use tracing::debug;

use crate::frame::payload::{SensorSnapshot, Verdict};
use crate::settings::SettingField;
use crate::telemetry::Role;

pub const DISPLAY_COLUMNS: usize = 16;
pub const DISPLAY_ROWS: usize = 2;

/// Contents of every row
pub type Page = [String; DISPLAY_ROWS];

/// Character display device
pub trait Display: Send {
    /// Current contents
    fn contents(&self) -> &Page;

    /// Replace the contents; lines longer than the display are cut
    fn write(&mut self, page: Page);

    fn clear(&mut self) {
        self.write(Default::default());
    }
}

/// In-memory display that logs what it shows
#[derive(Debug, Default)]
pub struct TextDisplay {
    page: Page,
}

impl TextDisplay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Display for TextDisplay {
    fn contents(&self) -> &Page {
        &self.page
    }

    fn write(&mut self, page: Page) {
        let page = page.map(|line| line.chars().take(DISPLAY_COLUMNS).collect::<String>());
        if page != self.page {
            debug!(row0 = %page[0], row1 = %page[1], "Display");
            self.page = page;
        }
    }
}

/// The display plus whether a transient message currently owns it
///
/// Always accessed under the display lock.
pub struct Screen {
    device: Box<dyn Display>,
    held: Option<HoldId>,
    holds: u64,
}

/// Identifies one held message; a later hold supersedes it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldId(u64);

impl std::fmt::Debug for Screen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Screen")
            .field("page", self.device.contents())
            .field("held", &self.held)
            .finish()
    }
}

impl Screen {
    pub fn new(device: Box<dyn Display>) -> Self {
        Self {
            device,
            held: None,
            holds: 0,
        }
    }

    pub fn contents(&self) -> &Page {
        self.device.contents()
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// Draw the status page unless a message is being shown
    ///
    /// Returns whether the display changed.
    pub fn refresh(&mut self, page: Page) -> bool {
        if self.held.is_some() || self.device.contents() == &page {
            return false;
        }
        self.device.write(page);
        true
    }

    /// Show a message that status refreshes will not overwrite
    pub fn hold_message(&mut self, page: Page) -> HoldId {
        self.holds += 1;
        let id = HoldId(self.holds);
        self.held = Some(id);
        self.device.write(page);
        id
    }

    /// Drop the held message and blank the display
    ///
    /// Does nothing unless `id` is still the current hold. Returns whether
    /// the display was released.
    pub fn release(&mut self, id: HoldId) -> bool {
        if self.held != Some(id) {
            return false;
        }
        self.held = None;
        self.device.clear();
        true
    }
}

/// Everything the status page shows
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusView {
    pub role: Role,
    pub sensors: SensorSnapshot,
    pub verdict: Verdict,
    pub rssi: Option<i16>,
    pub paused: bool,
    pub backend_online: bool,
}

/// Render the status page
///
/// ```text
/// T28.3 H55.0 P6.5
/// L -72dBm S+ ||
/// ```
/// `L`/`T` is the classification (layak / tidak layak), `S+`/`S-` the
/// backend state (Receiver only), `||` the pause marker.
pub fn render_status(view: &StatusView) -> Page {
    let top = format!(
        "T{:.1} H{:.1} P{:.1}",
        view.sensors.temperature, view.sensors.humidity, view.sensors.ph
    );

    let mut bottom = String::with_capacity(DISPLAY_COLUMNS);
    bottom.push(if view.verdict.classification { 'L' } else { 'T' });
    bottom.push(' ');
    match view.rssi {
        Some(rssi) => bottom.push_str(&format!("{}dBm", rssi)),
        None => bottom.push_str("no link"),
    }
    if view.role == Role::Responder {
        bottom.push_str(if view.backend_online { " S+" } else { " S-" });
    }
    if view.paused {
        bottom.push_str(" ||");
    }

    [top, bottom]
}

/// Shown while a setting is written
pub fn saving_page(field: SettingField, value: &str) -> Page {
    ["Saving".to_string(), format!("{} {}", field.name(), value)]
}
