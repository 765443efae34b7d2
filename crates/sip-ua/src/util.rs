use bytesstr::BytesStr;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

/// Random alphanumeric string for tags and call ids
pub fn random_string() -> BytesStr {
    thread_rng()
        .sample_iter(Alphanumeric)
        .take(10)
        .map(char::from)
        .collect::<String>()
        .into()
}

/// Random initial sequence number, below the RFC 3261 2^31 bound
pub fn random_sequence_number() -> u32 {
    thread_rng().gen_range(0x100..0x7FFF_FFFF)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sequence_number_bounds() {
        for _ in 0..100 {
            let n = random_sequence_number();
            assert!(n >= 0x100 && n < 0x8000_0000);
        }
    }
}
