//! studio-live: native core of an AI studio client.
//!
//! Streams microphone audio to a hosted multimodal model over a live
//! bidirectional session and plays the spoken replies back gaplessly, with
//! barge-in interruption.  Request/response model operations (chat, image,
//! video, transcription, speech) sit alongside in [`service`].
//!
//! # Modules
//!
//! | Module       | Responsibility                                           |
//! |--------------|----------------------------------------------------------|
//! | [`codec`]    | base64 text ⇄ bytes, PCM16 ⇄ normalized samples           |
//! | [`audio`]    | cpal microphone capture, downmix, resample, framing      |
//! | [`session`]  | live session contract, ordered send queue, WebSocket     |
//! | [`playback`] | gapless scheduler, interruption, cpal output sink        |
//! | [`pipeline`] | orchestrator state machine tying the above together      |
//! | [`service`]  | REST model operations                                    |
//! | [`config`]   | `settings.toml` persistence and platform paths           |

pub mod audio;
pub mod codec;
pub mod config;
pub mod pipeline;
pub mod playback;
pub mod service;
pub mod session;
