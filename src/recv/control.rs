//! Remote control of the source, for PTZ cameras and recorders.
//!
//! Every command returns `false` when the receiver is not connected.

use super::Recv;
use crate::{
    frame::MetadataFrame,
    io::frame::text::{self, Command, Mode, WhiteBalanceMode},
};

impl Recv {
    fn command(&self, command: Command) -> bool {
        let packet = command
            .to_xml()
            .and_then(|xml| text::encode(&MetadataFrame::new(xml)));

        self.shared.transmit(packet)
    }

    /// Set the zoom level, from `0.0` (wide) to `1.0` (tele).
    pub fn ptz_zoom(&self, zoom: f32) -> bool {
        self.command(Command::Zoom(text::Zoom { zoom }))
    }

    /// Zoom at `zoom_speed`, from `-1.0` (out) to `1.0` (in), `0.0` stops.
    pub fn ptz_zoom_speed(&self, zoom_speed: f32) -> bool {
        self.command(Command::ZoomSpeed(text::ZoomSpeed { zoom_speed }))
    }

    /// Set the absolute pan and tilt, each from `-1.0` to `1.0`.
    pub fn ptz_pan_tilt(&self, pan: f32, tilt: f32) -> bool {
        self.command(Command::PanTilt(text::PanTilt { pan, tilt }))
    }

    /// Pan and tilt at the given speeds, each from `-1.0` to `1.0`, `0.0` stops.
    pub fn ptz_pan_tilt_speed(&self, pan_speed: f32, tilt_speed: f32) -> bool {
        self.command(Command::PanTiltSpeed(text::PanTiltSpeed {
            pan_speed,
            tilt_speed,
        }))
    }

    /// Store the current position in the preset slot `index`.
    pub fn ptz_store_preset(&self, index: u32) -> bool {
        self.command(Command::StorePreset(text::Preset { index, speed: None }))
    }

    /// Move to the position stored in the preset slot `index`, at `speed` from `0.0` to `1.0`.
    pub fn ptz_recall_preset(&self, index: u32, speed: f32) -> bool {
        self.command(Command::RecallPreset(text::Preset {
            index,
            speed: Some(speed),
        }))
    }

    pub fn ptz_auto_focus(&self) -> bool {
        self.command(Command::Focus(text::Focus {
            mode: Mode::Auto,
            distance: None,
        }))
    }

    /// Focus manually at `distance`, from `0.0` (near) to `1.0` (far).
    pub fn ptz_focus(&self, distance: f32) -> bool {
        self.command(Command::Focus(text::Focus {
            mode: Mode::Manual,
            distance: Some(distance),
        }))
    }

    /// Move the focus at `speed`, from `-1.0` (near) to `1.0` (far).
    pub fn ptz_focus_speed(&self, speed: f32) -> bool {
        self.command(Command::FocusSpeed(text::FocusSpeed { speed }))
    }

    fn white_balance(&self, mode: WhiteBalanceMode, gains: Option<(f32, f32)>) -> bool {
        self.command(Command::WhiteBalance(text::WhiteBalance {
            mode,
            red: gains.map(|(red, _)| red),
            blue: gains.map(|(_, blue)| blue),
        }))
    }

    pub fn ptz_white_balance_auto(&self) -> bool {
        self.white_balance(WhiteBalanceMode::Auto, None)
    }

    pub fn ptz_white_balance_indoor(&self) -> bool {
        self.white_balance(WhiteBalanceMode::Indoor, None)
    }

    pub fn ptz_white_balance_outdoor(&self) -> bool {
        self.white_balance(WhiteBalanceMode::Outdoor, None)
    }

    /// Calibrate the white balance once on the current picture, and keep it.
    pub fn ptz_white_balance_oneshot(&self) -> bool {
        self.white_balance(WhiteBalanceMode::Oneshot, None)
    }

    /// Set the red and blue gains manually, each from `0.0` to `1.0`.
    pub fn ptz_white_balance_manual(&self, red: f32, blue: f32) -> bool {
        self.white_balance(WhiteBalanceMode::Manual, Some((red, blue)))
    }

    pub fn ptz_exposure_auto(&self) -> bool {
        self.command(Command::Exposure(text::Exposure {
            mode: Mode::Auto,
            level: None,
        }))
    }

    /// Set the exposure manually at `level`, from `0.0` (dark) to `1.0` (light).
    pub fn ptz_exposure_manual(&self, level: f32) -> bool {
        self.command(Command::Exposure(text::Exposure {
            mode: Mode::Manual,
            level: Some(level),
        }))
    }

    pub fn recording_start(&self) -> bool {
        self.command(Command::RecordStart(Default::default()))
    }

    pub fn recording_stop(&self) -> bool {
        self.command(Command::RecordStop(Default::default()))
    }
}
