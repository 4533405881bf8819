//! Vendor code tables for the coded report labels.
//!
//! Lock alarm states follow the dispatcher's sense: `on` means unlocked,
//! `off` means locked.

use zwbridge_types::StateCommand;

/// One entry of the door-lock `Alarm Type` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockAlarm {
    pub code: i64,
    pub description: &'static str,
    /// `None` for codes that are known but carry no lock state.
    pub state: Option<StateCommand>,
}

const fn alarm(code: i64, description: &'static str, state: Option<StateCommand>) -> LockAlarm {
    LockAlarm {
        code,
        description,
        state,
    }
}

pub const LOCK_ALARMS: &[LockAlarm] = &[
    alarm(9, "Deadbolt jammed", Some(StateCommand::Jammed)),
    alarm(18, "Locked with keypad", Some(StateCommand::Off)),
    alarm(19, "Unlocked with keypad", Some(StateCommand::On)),
    alarm(21, "Manually locked", Some(StateCommand::Off)),
    alarm(22, "Manually unlocked", Some(StateCommand::On)),
    alarm(24, "Locked by RF", Some(StateCommand::Off)),
    alarm(25, "Unlocked by RF", Some(StateCommand::On)),
    alarm(27, "Auto re-lock", Some(StateCommand::Off)),
    alarm(33, "User deleted", None),
    alarm(112, "Master code changed or user added", None),
    alarm(113, "Duplicate pin-code", None),
    alarm(130, "RF module, power restored", None),
    alarm(161, "Tamper alarm", None),
    alarm(167, "Low battery", Some(StateCommand::Battery)),
    alarm(168, "Critical battery level", Some(StateCommand::Battery)),
    alarm(169, "Battery too low to operate", Some(StateCommand::Battery)),
];

pub fn lock_alarm(code: i64) -> Option<&'static LockAlarm> {
    LOCK_ALARMS.iter().find(|a| a.code == code)
}

/// `Access Control` codes: open is `on`, closed is `off`.
pub fn access_control(code: i64) -> Option<(&'static str, StateCommand)> {
    match code {
        22 => Some(("Open", StateCommand::On)),
        23 => Some(("Closed", StateCommand::Off)),
        _ => None,
    }
}

/// `Burglar` notification events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurglarEvent {
    RemovedFromWall,
    Motion,
}

impl BurglarEvent {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            3 => Some(BurglarEvent::RemovedFromWall),
            8 => Some(BurglarEvent::Motion),
            _ => None,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            BurglarEvent::RemovedFromWall => "Removed from wall",
            BurglarEvent::Motion => "Motion",
        }
    }
}
