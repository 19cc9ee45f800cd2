use serde::{Deserialize, Serialize};

use crate::utils::error::GatewayError;

/// On-wire value interpretation for an addressable sensor.
///
/// Multi-register values use big-endian word order, high word first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    U16,
    I16,
    U32,
    I32,
    F32,
}

impl ValueType {
    pub fn register_count(&self) -> u16 {
        match self {
            ValueType::U16 | ValueType::I16 => 1,
            ValueType::U32 | ValueType::I32 | ValueType::F32 => 2,
        }
    }

    /// Default sanity bounds derived from register width and signedness.
    /// Floats carry no inherent bounds.
    pub fn default_bounds(&self) -> (Option<f64>, Option<f64>) {
        match self {
            ValueType::U16 => (Some(0.0), Some(u16::MAX as f64)),
            ValueType::I16 => (Some(i16::MIN as f64), Some(i16::MAX as f64)),
            ValueType::U32 => (Some(0.0), Some(u32::MAX as f64)),
            ValueType::I32 => (Some(i32::MIN as f64), Some(i32::MAX as f64)),
            ValueType::F32 => (None, None),
        }
    }
}

pub fn decode_value(value_type: ValueType, registers: &[u16]) -> Result<f64, GatewayError> {
    let needed = value_type.register_count() as usize;
    if registers.len() < needed {
        return Err(GatewayError::InvalidData(format!(
            "Expected {} registers, got {}",
            needed,
            registers.len()
        )));
    }

    let value = match value_type {
        ValueType::U16 => registers[0] as f64,
        ValueType::I16 => registers[0] as i16 as f64,
        ValueType::U32 => {
            (((registers[0] as u32) << 16) | registers[1] as u32) as f64
        }
        ValueType::I32 => {
            (((registers[0] as u32) << 16) | registers[1] as u32) as i32 as f64
        }
        ValueType::F32 => {
            f32::from_bits(((registers[0] as u32) << 16) | registers[1] as u32) as f64
        }
    };
    Ok(value)
}

pub fn encode_value(value_type: ValueType, value: f64) -> Vec<u16> {
    match value_type {
        ValueType::U16 => vec![value as u16],
        ValueType::I16 => vec![value as i16 as u16],
        ValueType::U32 => {
            let bits = value as u32;
            vec![(bits >> 16) as u16, bits as u16]
        }
        ValueType::I32 => {
            let bits = value as i32 as u32;
            vec![(bits >> 16) as u16, bits as u16]
        }
        ValueType::F32 => {
            let bits = (value as f32).to_bits();
            vec![(bits >> 16) as u16, bits as u16]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u16_round_trip() {
        let regs = encode_value(ValueType::U16, 1234.0);
        assert_eq!(regs, vec![1234]);
        assert_eq!(decode_value(ValueType::U16, &regs).unwrap(), 1234.0);
    }

    #[test]
    fn test_i16_negative() {
        let regs = encode_value(ValueType::I16, -5.0);
        assert_eq!(decode_value(ValueType::I16, &regs).unwrap(), -5.0);
    }

    #[test]
    fn test_f32_word_order() {
        let regs = encode_value(ValueType::F32, 21.5);
        assert_eq!(regs.len(), 2);
        // High word first
        let bits = ((regs[0] as u32) << 16) | regs[1] as u32;
        assert_eq!(f32::from_bits(bits), 21.5);
        assert_eq!(decode_value(ValueType::F32, &regs).unwrap(), 21.5);
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert!(decode_value(ValueType::U32, &[1]).is_err());
    }
}
