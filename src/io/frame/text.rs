use std::net::SocketAddr;

use binrw::{BinRead, BinWrite};
use derive_more::BitOr;
use serde::{Deserialize, Serialize};

use super::{Frame, FrameKind};
use crate::{
    frame::{MetadataFrame, SYNTHESIZE},
    io::Packet,
    Result,
};

pub type Block = super::Block<Spec, binrw::NullString>;

#[derive(Debug, PartialEq, BinRead, BinWrite)]
#[brw(little)]
pub struct Spec {
    pub timecode: i64,
}

impl Default for Spec {
    fn default() -> Self {
        Self {
            timecode: SYNTHESIZE,
        }
    }
}

/// Serialize `frame` into a ready-to-send [`Packet`].
pub fn encode(frame: &MetadataFrame) -> Result<Vec<u8>> {
    encode_at(frame, frame.timecode)
}

/// Serialize `frame` like [`encode`], with its timecode replaced by `timecode`.
pub fn encode_at(frame: &MetadataFrame, timecode: i64) -> Result<Vec<u8>> {
    let mut header = Vec::new();
    Spec { timecode }.write(&mut std::io::Cursor::new(&mut header))?;

    let mut payload = Vec::with_capacity(frame.data.len() + 1);
    payload.extend_from_slice(frame.data.as_bytes());
    payload.push(0);

    Packet::encode(FrameKind::Text, &header, &payload)
}

impl Block {
    pub fn from_frame(frame: &MetadataFrame) -> Self {
        Self {
            header: Spec {
                timecode: frame.timecode,
            },
            data: frame.data.as_str().into(),
        }
    }

    pub fn to_frame(&self) -> MetadataFrame {
        MetadataFrame::new(String::from_utf8_lossy(&self.data.0))
            .with_timecode(self.header.timecode)
    }
}

/// The control messages exchanged between peers, as XML elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Metadata {
    #[serde(rename = "ndi_version")]
    Version(Version),

    #[serde(rename = "ndi_identify")]
    Identify(Identify),

    #[serde(rename = "ndi_video")]
    Video(Video),

    #[serde(rename = "ndi_enabled_streams")]
    EnabledStreams(EnabledStreams),

    #[serde(rename = "ndi_tally")]
    Tally(Tally),

    #[serde(rename = "ndi_tally_echo")]
    TallyEcho(Tally),

    #[serde(rename = "ndi_failover")]
    Failover(Failover),

    #[serde(rename = "ntk_ptz")]
    Ptz(Capability),

    #[serde(rename = "ntk_recording")]
    Recording(Capability),

    #[serde(rename = "ntk_web_control")]
    WebControl(WebControl),
}

impl Metadata {
    pub fn from_block(block: &Block) -> Result<Self> {
        let mut text = std::io::Cursor::new(&block.data.0);

        Ok(quick_xml::de::from_reader::<_, Self>(&mut text)?)
    }

    pub fn from_xml(xml: &str) -> Result<Self> {
        Ok(quick_xml::de::from_str(xml)?)
    }

    pub fn to_xml(&self) -> Result<String> {
        Ok(quick_xml::se::to_string(&self)?)
    }

    pub fn to_block(&self) -> Result<Block> {
        Ok(Block::with_payload(self.to_xml()?))
    }

    pub fn to_frame(&self) -> Result<Frame> {
        Ok(Frame::Text(self.to_block()?))
    }

    /// Serialize the message into a ready-to-send [`Packet`].
    pub fn to_packet(&self) -> Result<Vec<u8>> {
        encode(&MetadataFrame::new(self.to_xml()?))
    }
}

/// Metadata definition for _version_ in the protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    /// Version number of _text_ frames.
    #[serde(rename = "@text")]
    pub text: u16,

    /// Version number of _video_ frames.
    #[serde(rename = "@video")]
    pub video: u16,

    /// Version number of _audio_ frames.
    #[serde(rename = "@audio")]
    pub audio: u16,

    /// Version of the _SDK_.
    #[serde(rename = "@sdk")]
    pub sdk: String,

    /// Platform running the _SDK_.
    #[serde(rename = "@platform")]
    pub platform: String,
}

impl Default for Version {
    fn default() -> Self {
        Self {
            text: FrameKind::Text.version(),
            video: FrameKind::Video.version(),
            audio: FrameKind::Audio.version(),
            sdk: crate::SDK_VERSION.into(),
            platform: crate::SDK_PLATFORM.into(),
        }
    }
}

/// Metadata definition for _identification_ in the protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identify {
    /// The name of the peer.
    #[serde(rename = "@name")]
    pub name: String,
}

/// Metadata definition for _video_ in the protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    /// The requested _quality_ of the video stream.
    #[serde(rename = "@quality")]
    pub quality: VideoQuality,

    /// The preferred _color format_ of the receiver, forwarded as-is.
    #[serde(rename = "@color", default, skip_serializing_if = "Option::is_none")]
    pub color: Option<ColorFormat>,
}

/// Different video qualities available in the protocol.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoQuality {
    /// High definition video stream.
    #[default]
    High,

    /// Low definition video stream.
    Low,
}

/// The color formats a receiver may prefer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorFormat {
    /// BGRX when opaque, BGRA with alpha.
    BgrxBgra,

    /// UYVY when opaque, BGRA with alpha.
    #[default]
    UyvyBgra,

    /// RGBX when opaque, RGBA with alpha.
    RgbxRgba,

    /// UYVY when opaque, RGBA with alpha.
    UyvyRgba,

    /// Whatever the sender produces with the least work.
    Fastest,

    /// Whatever the sender produces with the most fidelity.
    Best,
}

/// Metadata definition for _enabled streams_ in the protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnabledStreams {
    /// Whether _text_ streams are supported.
    #[serde(rename = "@text")]
    pub text: bool,

    /// Whether _video_ streams are supported.
    #[serde(rename = "@video")]
    pub video: bool,

    /// Whether _audio_ streams are supported.
    #[serde(rename = "@audio")]
    pub audio: bool,
}

impl Default for EnabledStreams {
    fn default() -> Self {
        Self {
            text: true,
            video: true,
            audio: true,
        }
    }
}

/// Metadata definition for _tally_ in the protocol.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, BitOr, Serialize, Deserialize)]
pub struct Tally {
    /// Whether we currently are _on program_.
    #[serde(rename = "@on_program")]
    pub on_program: bool,

    /// Whether we currently are _on preview_.
    #[serde(rename = "@on_preview")]
    pub on_preview: bool,
}

/// Metadata definition for the _failover_ source a sender designates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failover {
    /// The name of the failover source.
    #[serde(rename = "@name")]
    pub name: String,

    /// The addresses the failover source is reachable at, comma-separated.
    #[serde(rename = "@addrs")]
    pub addrs: String,
}

impl Failover {
    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.addrs
            .split(',')
            .filter_map(|addr| addr.trim().parse().ok())
            .collect()
    }
}

/// Metadata definition for a _capability_ announced by a sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    #[serde(rename = "@enabled")]
    pub enabled: bool,
}

/// Metadata definition for the _web control_ page of a sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebControl {
    #[serde(rename = "@url")]
    pub url: String,
}

/// The remote-control commands a receiver may send to its source.
///
/// Senders receive them as metadata frames and can decode them with [`Command::from_xml`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    #[serde(rename = "ntk_ptz_zoom")]
    Zoom(Zoom),

    #[serde(rename = "ntk_ptz_zoom_speed")]
    ZoomSpeed(ZoomSpeed),

    #[serde(rename = "ntk_ptz_pan_tilt")]
    PanTilt(PanTilt),

    #[serde(rename = "ntk_ptz_pan_tilt_speed")]
    PanTiltSpeed(PanTiltSpeed),

    #[serde(rename = "ntk_ptz_store_preset")]
    StorePreset(Preset),

    #[serde(rename = "ntk_ptz_recall_preset")]
    RecallPreset(Preset),

    #[serde(rename = "ntk_ptz_focus")]
    Focus(Focus),

    #[serde(rename = "ntk_ptz_focus_speed")]
    FocusSpeed(FocusSpeed),

    #[serde(rename = "ntk_ptz_white_balance")]
    WhiteBalance(WhiteBalance),

    #[serde(rename = "ntk_ptz_exposure")]
    Exposure(Exposure),

    #[serde(rename = "ntk_record_start")]
    RecordStart(Record),

    #[serde(rename = "ntk_record_stop")]
    RecordStop(Record),
}

impl Command {
    pub fn from_xml(xml: &str) -> Result<Self> {
        Ok(quick_xml::de::from_str(xml)?)
    }

    pub fn to_xml(&self) -> Result<String> {
        Ok(quick_xml::se::to_string(&self)?)
    }
}

/// Zoom level, from `0.0` (wide) to `1.0` (tele).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zoom {
    #[serde(rename = "@zoom")]
    pub zoom: f32,
}

/// Zoom speed, from `-1.0` (out) to `1.0` (in).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoomSpeed {
    #[serde(rename = "@zoom_speed")]
    pub zoom_speed: f32,
}

/// Absolute pan and tilt, each from `-1.0` to `1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PanTilt {
    #[serde(rename = "@pan")]
    pub pan: f32,

    #[serde(rename = "@tilt")]
    pub tilt: f32,
}

/// Pan and tilt speeds, each from `-1.0` to `1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PanTiltSpeed {
    #[serde(rename = "@pan_speed")]
    pub pan_speed: f32,

    #[serde(rename = "@tilt_speed")]
    pub tilt_speed: f32,
}

/// A preset slot, and the speed to reach it when recalled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    #[serde(rename = "@index")]
    pub index: u32,

    #[serde(rename = "@speed", default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Auto,
    Manual,
}

/// Focus mode, and the distance from `0.0` (near) to `1.0` (far) when manual.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Focus {
    #[serde(rename = "@mode")]
    pub mode: Mode,

    #[serde(rename = "@distance", default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

/// Focus speed, from `-1.0` (near) to `1.0` (far).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocusSpeed {
    #[serde(rename = "@speed")]
    pub speed: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhiteBalanceMode {
    Auto,
    Indoor,
    Outdoor,
    Oneshot,
    Manual,
}

/// White balance mode, and the red and blue gains from `0.0` to `1.0` when manual.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WhiteBalance {
    #[serde(rename = "@mode")]
    pub mode: WhiteBalanceMode,

    #[serde(rename = "@red", default, skip_serializing_if = "Option::is_none")]
    pub red: Option<f32>,

    #[serde(rename = "@blue", default, skip_serializing_if = "Option::is_none")]
    pub blue: Option<f32>,
}

/// Exposure mode, and the level from `0.0` (dark) to `1.0` (light) when manual.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Exposure {
    #[serde(rename = "@mode")]
    pub mode: Mode,

    #[serde(rename = "@level", default, skip_serializing_if = "Option::is_none")]
    pub level: Option<f32>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_messages_are_xml_elements() {
        let xml = Metadata::Tally(Tally {
            on_program: true,
            on_preview: false,
        })
        .to_xml()
        .expect("serializable tally");

        assert!(xml.starts_with("<ndi_tally"), "{xml}");
        assert!(xml.contains(r#"on_program="true""#), "{xml}");
    }

    #[test]
    fn control_messages_are_parsed_back() {
        let parsed = Metadata::from_xml(r#"<ndi_identify name="HOST (camera)"/>"#)
            .expect("valid identify");

        assert_eq!(
            parsed,
            Metadata::Identify(Identify {
                name: "HOST (camera)".into()
            })
        );
    }

    #[test]
    fn user_metadata_is_not_control() {
        assert!(Metadata::from_xml(r#"<scoreboard home="3" away="1"/>"#).is_err());
        assert!(Metadata::from_xml("not even xml").is_err());
    }

    #[test]
    fn commands_decode_on_the_sender_side() {
        let command = Command::RecallPreset(Preset {
            index: 3,
            speed: Some(0.5),
        });
        let xml = command.to_xml().expect("serializable command");

        assert_eq!(Command::from_xml(&xml).expect("valid command"), command);
        assert!(Metadata::from_xml(&xml).is_err());
    }

    #[tokio::test]
    async fn metadata_packets_are_nul_terminated() {
        let frame = MetadataFrame::new("<scoreboard/>").with_timecode(12);
        let raw = encode(&frame).expect("encodable frame");

        assert_eq!(raw.last(), Some(&0));

        let packet = Packet::read(&mut raw.as_slice())
            .await
            .expect("readable packet");
        let Frame::Text(block) = packet.into_frame().expect("decodable frame") else {
            panic!("expected a text frame");
        };
        assert_eq!(block.to_frame(), frame);
    }

    #[test]
    fn failover_addresses() {
        let failover = Failover {
            name: "HOST (backup)".into(),
            addrs: "127.0.0.1:5960, [::1]:5961, garbage".into(),
        };

        assert_eq!(failover.addresses().len(), 2);
    }

    #[test]
    fn tallies_combine() {
        let program = Tally {
            on_program: true,
            on_preview: false,
        };
        let preview = Tally {
            on_program: false,
            on_preview: true,
        };

        assert_eq!(
            program | preview,
            Tally {
                on_program: true,
                on_preview: true
            }
        );
    }
}
