//! audio - Real-time playback and capture pipelines
//!
//! Playback fetches MP3 over HTTP, decodes frame by frame and writes stereo
//! PCM to ALSA. Capture reads the mic into a ring buffer and streams mono
//! 16 kHz PCM, behind a WAV header, over a websocket.

pub mod accum;
pub mod activity;
pub mod alsa_device;
pub mod capture;
pub mod decode_session;
pub mod mp3;
pub mod playback;
pub mod ring_stream;
pub mod stream_decoder;
pub mod upload;
pub mod wav;

pub use activity::{Activity, EngineContext};
pub use alsa_device::{AlsaMic, AlsaOutput};
pub use capture::CaptureEngine;
pub use decode_session::DecodeSession;
pub use mp3::Mp3Decoder;
pub use playback::{AudioFetcher, PlaybackEngine};
pub use upload::{ConnectPoll, PendingUpload, UploadConnector, UploadTransport};
