use std::error::Error;

use serde::{Serialize, Deserialize};

const CONFIG_PATH: &str = "config.toml";

#[derive(Serialize, Deserialize)]
pub struct Config {
    pub nick: Option<String>,
    pub relay_url: Option<String>,
    pub track_base_url: Option<String>,
    pub turn_server: Option<String>,
    pub turn_username: Option<String>,
    pub turn_password: Option<String>,
}

impl Config {
    pub fn default() -> Self {
        Self {
            nick: None,
            relay_url: Some("wss://ponytone.online/party".into()),
            track_base_url: Some("https://music.ponytone.online".into()),
            turn_server: Some("turn:sfo.turn.ponytone.online".into()),
            turn_username: None,
            turn_password: None,
        }
    }

    pub fn load() -> Result<Self, Box<dyn Error>> {
        let s = std::fs::read_to_string(CONFIG_PATH)?;
        let c = toml::from_str(&s)?;
        Ok(c)
    }

    pub fn save(&self) -> Result<(), Box<dyn Error>> {
        let s = toml::to_string(self)?;
        std::fs::write(CONFIG_PATH, s)?;
        Ok(())
    }

    /// Base URL of one track's assets on the music server. Media paths
    /// from the chart are resolved against this.
    pub fn track_url(&self, track: u32) -> Option<String> {
        let base = self.track_base_url.as_deref()?;
        Some(format!("{}/{}", base, track))
    }

    /// Location of a track's chart file on the music server.
    pub fn notes_url(&self, track: u32) -> Option<String> {
        Some(format!("{}/notes.txt", self.track_url(track)?))
    }
}
