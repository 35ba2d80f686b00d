/// Every strategy hands out memory usable for any type up to this alignment.
pub const MAX_ALIGN: usize = 16;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AlignError {
    #[error("alignment {0} is not a power of two")]
    NotPowerOfTwo(u64),

    #[error("aligning {value} to {align} overflows")]
    Overflow { value: u64, align: u64 },
}

fn check(align: u64) -> Result<(), AlignError> {
    if align.is_power_of_two() {
        Ok(())
    } else {
        Err(AlignError::NotPowerOfTwo(align))
    }
}

pub fn align_up(value: u64, align: u64) -> Result<u64, AlignError> {
    check(align)?;
    let mask = align - 1;
    value
        .checked_add(mask)
        .map(|v| v & !mask)
        .ok_or(AlignError::Overflow { value, align })
}

/// Bytes needed to move `value` forward to the next multiple of `align`.
pub fn padding_for(value: u64, align: u64) -> Result<u64, AlignError> {
    Ok(align_up(value, align)? - value)
}

/// Rounds a byte count up to a multiple of [`MAX_ALIGN`], saturating near `usize::MAX`.
pub const fn round_to_max_align(size: usize) -> usize {
    match size.checked_add(MAX_ALIGN - 1) {
        Some(v) => v & !(MAX_ALIGN - 1),
        None => usize::MAX & !(MAX_ALIGN - 1),
    }
}
