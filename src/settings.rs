//! HTTP/2 SETTINGS parameters (RFC 7540 Section 6.5.2).

use crate::error::DecodeError;
use crate::frame::{
    settings_id, ErrorCode, Setting, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE, MAX_FRAME_LENGTH,
    MAX_WINDOW_SIZE,
};

/// Check one received setting against the ranges RFC 7540 allows.
pub fn validate(setting: &Setting) -> Result<(), DecodeError> {
    match setting.id {
        settings_id::ENABLE_PUSH if setting.value > 1 => Err(DecodeError::connection(
            ErrorCode::PROTOCOL_ERROR,
            format!("ENABLE_PUSH must be 0 or 1, got {}", setting.value),
        )),
        settings_id::INITIAL_WINDOW_SIZE if setting.value > MAX_WINDOW_SIZE => Err(DecodeError::connection(
            ErrorCode::FLOW_CONTROL_ERROR,
            format!("INITIAL_WINDOW_SIZE {} exceeds 2^31-1", setting.value),
        )),
        settings_id::MAX_FRAME_SIZE if !(DEFAULT_MAX_FRAME_SIZE..=MAX_FRAME_LENGTH).contains(&setting.value) => {
            Err(DecodeError::connection(
                ErrorCode::PROTOCOL_ERROR,
                format!("MAX_FRAME_SIZE {} out of range", setting.value),
            ))
        }
        _ => Ok(()),
    }
}

/// HTTP/2 SETTINGS values for one side of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// SETTINGS_HEADER_TABLE_SIZE (0x1). Default 4096.
    pub header_table_size: u32,
    /// SETTINGS_ENABLE_PUSH (0x2). Default enabled.
    pub enable_push: bool,
    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x3). Default unlimited.
    pub max_concurrent_streams: Option<u32>,
    /// SETTINGS_INITIAL_WINDOW_SIZE (0x4). Default 65535.
    pub initial_window_size: u32,
    /// SETTINGS_MAX_FRAME_SIZE (0x5). Default 16384.
    pub max_frame_size: u32,
    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x6). Default unlimited.
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    /// Client defaults: push disabled (ENABLE_PUSH=0).
    pub fn client_default() -> Self {
        Self {
            enable_push: false,
            ..Default::default()
        }
    }

    /// Apply a received batch in order. Settings take effect on receipt.
    /// Unknown identifiers are ignored.
    pub fn apply(&mut self, settings: &[Setting]) -> Result<(), DecodeError> {
        for setting in settings {
            validate(setting)?;
            match setting.id {
                settings_id::HEADER_TABLE_SIZE => self.header_table_size = setting.value,
                settings_id::ENABLE_PUSH => self.enable_push = setting.value == 1,
                settings_id::MAX_CONCURRENT_STREAMS => self.max_concurrent_streams = Some(setting.value),
                settings_id::INITIAL_WINDOW_SIZE => self.initial_window_size = setting.value,
                settings_id::MAX_FRAME_SIZE => self.max_frame_size = setting.value,
                settings_id::MAX_HEADER_LIST_SIZE => self.max_header_list_size = Some(setting.value),
                _ => {}
            }
        }
        Ok(())
    }

    /// The entries that differ from the protocol defaults, for a SETTINGS frame.
    pub fn to_setting_list(&self) -> Vec<Setting> {
        let defaults = Settings::default();
        let mut list = Vec::new();
        if self.header_table_size != defaults.header_table_size {
            list.push(Setting::new(settings_id::HEADER_TABLE_SIZE, self.header_table_size));
        }
        if self.enable_push != defaults.enable_push {
            list.push(Setting::new(settings_id::ENABLE_PUSH, u32::from(self.enable_push)));
        }
        if let Some(v) = self.max_concurrent_streams {
            list.push(Setting::new(settings_id::MAX_CONCURRENT_STREAMS, v));
        }
        if self.initial_window_size != defaults.initial_window_size {
            list.push(Setting::new(settings_id::INITIAL_WINDOW_SIZE, self.initial_window_size));
        }
        if self.max_frame_size != defaults.max_frame_size {
            list.push(Setting::new(settings_id::MAX_FRAME_SIZE, self.max_frame_size));
        }
        if let Some(v) = self.max_header_list_size {
            list.push(Setting::new(settings_id::MAX_HEADER_LIST_SIZE, v));
        }
        list
    }
}
