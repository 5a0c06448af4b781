// Motor board command protocol (PicoBorg Reverse numbering)
//
// Write frame: [opcode, payload...] with at most 3 payload bytes.
// Read frame:  send [opcode], then read 4 bytes; byte 0 echoes the opcode.

/// Maximum payload bytes following the opcode
pub const MAX_PAYLOAD: usize = 3;

/// Fixed response length for GET commands
pub const RESPONSE_LEN: usize = 4;

/// Full-scale PWM magnitude
pub const PWM_MAX: u8 = 255;

/// Board identifier returned in byte 1 of a GET_ID reply
pub const BOARD_ID: u8 = 0x15;

/// Default I2C address of the board
pub const DEFAULT_ADDRESS: u8 = 0x44;

/// Direction flag values in GET_A / GET_B replies
pub const VALUE_FWD: u8 = 1;
pub const VALUE_REV: u8 = 2;

/// Boolean flag values
pub const VALUE_ON: u8 = 1;
pub const VALUE_OFF: u8 = 0;

/// Command opcodes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    SetLed = 1,
    GetLed = 2,
    SetAFwd = 3,
    SetARev = 4,
    GetA = 5,
    SetBFwd = 6,
    SetBRev = 7,
    GetB = 8,
    AllOff = 9,
    ResetEpo = 10,
    GetEpo = 11,
    SetEpoIgnore = 12,
    GetEpoIgnore = 13,
    GetDriveFault = 14,
    SetAllFwd = 15,
    SetAllRev = 16,
    SetFailsafe = 17,
    GetFailsafe = 18,
    GetId = 0x99,
}

impl Opcode {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        let opcode = match byte {
            1 => Opcode::SetLed,
            2 => Opcode::GetLed,
            3 => Opcode::SetAFwd,
            4 => Opcode::SetARev,
            5 => Opcode::GetA,
            6 => Opcode::SetBFwd,
            7 => Opcode::SetBRev,
            8 => Opcode::GetB,
            9 => Opcode::AllOff,
            10 => Opcode::ResetEpo,
            11 => Opcode::GetEpo,
            12 => Opcode::SetEpoIgnore,
            13 => Opcode::GetEpoIgnore,
            14 => Opcode::GetDriveFault,
            15 => Opcode::SetAllFwd,
            16 => Opcode::SetAllRev,
            17 => Opcode::SetFailsafe,
            18 => Opcode::GetFailsafe,
            0x99 => Opcode::GetId,
            other => return Err(other),
        };
        Ok(opcode)
    }
}

/// Encode a flag as its on/off byte
pub fn flag_byte(on: bool) -> u8 {
    if on { VALUE_ON } else { VALUE_OFF }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_byte_conversion() {
        assert_eq!(Opcode::GetId.as_byte(), 0x99);
        assert_eq!(Opcode::try_from(3), Ok(Opcode::SetAFwd));
        assert_eq!(Opcode::try_from(0x99), Ok(Opcode::GetId));
        assert_eq!(Opcode::try_from(0x42), Err(0x42));
    }
}
