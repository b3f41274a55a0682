use std::fmt;

use clap::ValueEnum;

/// The lock implementation driven by a benchmark run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum LockKind {
    /// The standard library's `std::sync::Mutex`, as a reference point.
    Mutex,
    /// The reciprocating lock.
    Reciprocating,
    /// The hapax visible-waiter lock.
    Hapax,
    /// The MCS queue lock.
    Mcs,
    /// The ticket-plus-waiting-array lock.
    Twa,
    /// The CLH queue lock.
    Clh,
}

impl LockKind {
    /// The spelling used both on the command line and in the report.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mutex => "mutex",
            Self::Reciprocating => "reciprocating",
            Self::Hapax => "hapax",
            Self::Mcs => "mcs",
            Self::Twa => "twa",
            Self::Clh => "clh",
        }
    }
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use clap::ValueEnum;

    use super::LockKind;

    #[test]
    fn value_enum_spellings_match_display() {
        for kind in LockKind::value_variants() {
            let spelling = kind.to_possible_value().unwrap();
            assert_eq!(spelling.get_name(), kind.as_str());
        }
    }
}
