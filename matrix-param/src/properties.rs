use serde::{Deserialize, Serialize};

/// Whether a draw returns a stochastic sample or the mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawType {
    #[default]
    Sample,
    Mode,
}

/// Which parameters an update refits
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateType {
    /// every parameter, in one consistent step
    #[default]
    All,
    /// only the per-observation latent parameters
    OnlyLatents,
    /// nothing; updates are no-ops
    Nothing,
}

/// Settings shared by every distribution instance. Owners such as a
/// likelihood keep one around to build their internal distributions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Properties {
    pub name: String,
    pub draw_type: DrawType,
    pub update_type: UpdateType,
    /// parameters survive across inference steps (and get checkpointed)
    pub persistent: bool,
}

impl Default for Properties {
    fn default() -> Self {
        Self {
            name: "NA".to_string(),
            draw_type: DrawType::Sample,
            update_type: UpdateType::All,
            persistent: true,
        }
    }
}

impl Properties {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_draw_type(mut self, draw_type: DrawType) -> Self {
        self.draw_type = draw_type;
        self
    }

    pub fn with_update_type(mut self, update_type: UpdateType) -> Self {
        self.update_type = update_type;
        self
    }

    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }
}
