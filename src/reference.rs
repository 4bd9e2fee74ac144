use chrono::{Local, NaiveDate};
use rand::Rng;

pub const REFERENCE_PREFIX: &str = "APT";
pub const CODE_LEN: usize = 6;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Source of customer-facing booking references.
pub trait ReferenceGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// `APT-YYYYMMDD-XXXXXX`: today's local date plus six uniform draws from
/// `[A-Z0-9]` (36^6 ≈ 2.2e9 codes per day).
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomReferenceGenerator;

impl RandomReferenceGenerator {
    pub fn generate_for(&self, date: NaiveDate) -> String {
        let mut rng = rand::thread_rng();
        let code: String = (0..CODE_LEN)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        format!("{REFERENCE_PREFIX}-{}-{code}", date.format("%Y%m%d"))
    }
}

impl ReferenceGenerator for RandomReferenceGenerator {
    fn generate(&self) -> String {
        self.generate_for(Local::now().date_naive())
    }
}
