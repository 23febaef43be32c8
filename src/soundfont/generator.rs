//! Generator records and the per-zone override table.
//!
//! A zone's behavior is described by a sparse list of generator records,
//! each a typed operator id plus a signed amount. Records accumulate into
//! a 64-slot table keyed by the low six bits of the operator id, with
//! later records overriding earlier ones, and are applied in operator-id
//! order when the zone is materialized.

/// Number of slots in a zone's override table.
pub const GENERATOR_SLOTS: usize = 64;

/// Generator operators the resolver understands.
///
/// Operators marked unused are recognized so they do not trip the
/// unknown-operator warning, but they do not affect playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Sample start address offset (unused).
    StartAddressOffset = 0,
    /// Reverb send (unused).
    Reverb = 16,
    /// Stereo pan position.
    Pan = 17,
    /// Volume envelope attack time, in timecents.
    AttackEnvelope = 34,
    /// Volume envelope hold time, in timecents.
    HoldEnvelope = 35,
    /// Volume envelope decay time, in timecents.
    DecayEnvelope = 36,
    /// Volume envelope sustain level.
    SustainEnvelope = 37,
    /// Volume envelope release time, in timecents.
    ReleaseEnvelope = 38,
    /// Binds a preset zone to an instrument.
    Instrument = 41,
    /// Key range covered by a zone, packed low/high bytes.
    KeyRange = 43,
    /// Velocity range (unused).
    VelocityRange = 44,
    /// Initial attenuation (unused).
    InitialAttenuation = 48,
    /// Binds a zone to a sample header record.
    SampleId = 53,
    /// Loop mode; bit 0 enables looping.
    SampleMode = 54,
    /// Scale tuning (unused).
    ScaleTuning = 56,
    /// Exclusive class (unused).
    ExclusiveClass = 57,
    /// Root key override (unused).
    OverrideRootKey = 58,
}

impl Operator {
    /// Maps a raw operator id to a known operator.
    pub fn from_id(id: u16) -> Option<Self> {
        Some(match id {
            0 => Self::StartAddressOffset,
            16 => Self::Reverb,
            17 => Self::Pan,
            34 => Self::AttackEnvelope,
            35 => Self::HoldEnvelope,
            36 => Self::DecayEnvelope,
            37 => Self::SustainEnvelope,
            38 => Self::ReleaseEnvelope,
            41 => Self::Instrument,
            43 => Self::KeyRange,
            44 => Self::VelocityRange,
            48 => Self::InitialAttenuation,
            53 => Self::SampleId,
            54 => Self::SampleMode,
            56 => Self::ScaleTuning,
            57 => Self::ExclusiveClass,
            58 => Self::OverrideRootKey,
            _ => return None,
        })
    }
}

/// One generator record: an operator id and its amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorRecord {
    /// Raw operator id.
    pub oper: u16,
    /// Signed amount; interpretation depends on the operator.
    pub amount: i16,
}

/// Sparse override table for one zone's generators.
///
/// Slots are keyed by `oper & 0x3F`; when several records share a slot
/// the last write wins.
#[derive(Debug, Default)]
pub struct GeneratorTable {
    amounts: [i16; GENERATOR_SLOTS],
    used: [bool; GENERATOR_SLOTS],
}

impl GeneratorTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record, overriding any earlier record in the same slot.
    pub fn put(&mut self, record: GeneratorRecord) {
        let slot = (record.oper & 0x3F) as usize;
        self.amounts[slot] = record.amount;
        self.used[slot] = true;
    }

    /// Returns true when no record has been stored.
    pub fn is_empty(&self) -> bool {
        !self.used.iter().any(|&u| u)
    }

    /// Iterates the stored records in operator-id order.
    pub fn records(&self) -> impl Iterator<Item = GeneratorRecord> + '_ {
        (0..GENERATOR_SLOTS).filter(|&i| self.used[i]).map(|i| GeneratorRecord {
            oper: i as u16,
            amount: self.amounts[i],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let mut table = GeneratorTable::new();
        table.put(GeneratorRecord { oper: 17, amount: 100 });
        table.put(GeneratorRecord { oper: 17, amount: -250 });
        let records: Vec<_> = table.records().collect();
        assert_eq!(records, vec![GeneratorRecord { oper: 17, amount: -250 }]);
    }

    #[test]
    fn test_records_in_operator_order() {
        let mut table = GeneratorTable::new();
        table.put(GeneratorRecord { oper: 53, amount: 1 });
        table.put(GeneratorRecord { oper: 17, amount: 2 });
        table.put(GeneratorRecord { oper: 34, amount: 3 });
        let opers: Vec<_> = table.records().map(|r| r.oper).collect();
        assert_eq!(opers, vec![17, 34, 53]);
    }

    #[test]
    fn test_empty_table() {
        let table = GeneratorTable::new();
        assert!(table.is_empty());
        assert_eq!(table.records().count(), 0);
    }

    #[test]
    fn test_operator_lookup() {
        assert_eq!(Operator::from_id(41), Some(Operator::Instrument));
        assert_eq!(Operator::from_id(53), Some(Operator::SampleId));
        assert_eq!(Operator::from_id(59), None);
    }
}
