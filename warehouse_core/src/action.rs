use serde::{Deserialize, Serialize};

use crate::Vec3;

/// Branch index of the horizontal (x) movement command.
pub const BRANCH_MOVE_X: usize = 0;
/// Branch index of the forward (z) movement command.
pub const BRANCH_MOVE_Z: usize = 1;
/// Branch index of the interaction command.
pub const BRANCH_INTERACT: usize = 2;

/// Number of discrete values on every branch.
pub const BRANCH_SIZE: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("action vector must have 3 branches, got {0}")]
    WrongLength(usize),
    #[error("branch {branch} value {value} is outside 0..=2")]
    OutOfRange { branch: usize, value: i32 },
}

/// One movement axis: `0 stay, 1 negative, 2 positive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MoveAxis {
    #[default]
    Stay,
    Negative,
    Positive,
}

impl MoveAxis {
    pub fn signal(self) -> f32 {
        match self {
            MoveAxis::Stay => 0.0,
            MoveAxis::Negative => -1.0,
            MoveAxis::Positive => 1.0,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    fn from_index(branch: usize, value: i32) -> Result<Self, ActionError> {
        match value {
            0 => Ok(MoveAxis::Stay),
            1 => Ok(MoveAxis::Negative),
            2 => Ok(MoveAxis::Positive),
            _ => Err(ActionError::OutOfRange { branch, value }),
        }
    }
}

/// Interaction branch. What `Primary`/`Secondary` mean depends on the role:
/// take/place for the Down agent, grab/load for the Up agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Interact {
    #[default]
    None,
    Primary,
    Secondary,
}

impl Interact {
    pub fn index(self) -> usize {
        self as usize
    }

    fn from_index(value: i32) -> Result<Self, ActionError> {
        match value {
            0 => Ok(Interact::None),
            1 => Ok(Interact::Primary),
            2 => Ok(Interact::Secondary),
            _ => Err(ActionError::OutOfRange {
                branch: BRANCH_INTERACT,
                value,
            }),
        }
    }
}

/// The discrete action triple `[move_x, move_z, interact]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActionVector {
    pub move_x: MoveAxis,
    pub move_z: MoveAxis,
    pub interact: Interact,
}

impl ActionVector {
    pub const IDLE: ActionVector = ActionVector {
        move_x: MoveAxis::Stay,
        move_z: MoveAxis::Stay,
        interact: Interact::None,
    };

    pub fn new(move_x: MoveAxis, move_z: MoveAxis, interact: Interact) -> Self {
        ActionVector {
            move_x,
            move_z,
            interact,
        }
    }

    /// Parses the raw integer layout a policy emits.
    pub fn from_raw(raw: &[i32]) -> Result<Self, ActionError> {
        let [x, z, i] = raw else {
            return Err(ActionError::WrongLength(raw.len()));
        };
        Ok(ActionVector {
            move_x: MoveAxis::from_index(BRANCH_MOVE_X, *x)?,
            move_z: MoveAxis::from_index(BRANCH_MOVE_Z, *z)?,
            interact: Interact::from_index(*i)?,
        })
    }

    pub fn to_raw(self) -> [i32; 3] {
        [
            self.move_x.index() as i32,
            self.move_z.index() as i32,
            self.interact.index() as i32,
        ]
    }

    /// Unnormalised planar direction built from the two axis signals.
    pub fn move_direction(&self) -> Vec3 {
        Vec3::new(self.move_x.signal(), 0.0, self.move_z.signal())
    }

    pub fn with_interact(self, interact: Interact) -> Self {
        ActionVector { interact, ..self }
    }
}

/// Per-branch, per-value enable flags exposed to a policy before it samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionMask {
    enabled: [[bool; BRANCH_SIZE]; 3],
}

impl Default for ActionMask {
    fn default() -> Self {
        ActionMask {
            enabled: [[true; BRANCH_SIZE]; 3],
        }
    }
}

impl ActionMask {
    pub fn set_enabled(&mut self, branch: usize, value: usize, enabled: bool) {
        if let Some(slot) = self.enabled.get_mut(branch).and_then(|b| b.get_mut(value)) {
            *slot = enabled;
        }
    }

    pub fn is_enabled(&self, branch: usize, value: usize) -> bool {
        self.enabled
            .get(branch)
            .and_then(|b| b.get(value))
            .copied()
            .unwrap_or(false)
    }

    pub fn interact_enabled(&self, interact: Interact) -> bool {
        self.is_enabled(BRANCH_INTERACT, interact.index())
    }

    /// Whether every component of `action` is enabled.
    pub fn permits(&self, action: &ActionVector) -> bool {
        self.is_enabled(BRANCH_MOVE_X, action.move_x.index())
            && self.is_enabled(BRANCH_MOVE_Z, action.move_z.index())
            && self.interact_enabled(action.interact)
    }
}

/// Raw keyboard state relevant to the heuristic controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyState {
    pub a: bool,
    pub d: bool,
    pub s: bool,
    pub w: bool,
    pub one: bool,
    pub two: bool,
}

impl KeyState {
    /// Maps key state onto the same action layout automated policies use.
    /// A wins over D, S over W, and 1 over 2 when both are held.
    pub fn to_action(&self) -> ActionVector {
        let move_x = if self.a {
            MoveAxis::Negative
        } else if self.d {
            MoveAxis::Positive
        } else {
            MoveAxis::Stay
        };
        let move_z = if self.s {
            MoveAxis::Negative
        } else if self.w {
            MoveAxis::Positive
        } else {
            MoveAxis::Stay
        };
        let interact = if self.one {
            Interact::Primary
        } else if self.two {
            Interact::Secondary
        } else {
            Interact::None
        };
        ActionVector::new(move_x, move_z, interact)
    }
}
