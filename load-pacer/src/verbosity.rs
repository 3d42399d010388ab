#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    #[default]
    Quiet,
    Debug,
}

impl Verbosity {
    pub fn is_debug(self) -> bool {
        matches!(self, Verbosity::Debug)
    }

    pub fn level_filter(self) -> log::LevelFilter {
        match self {
            Verbosity::Quiet => log::LevelFilter::Info,
            Verbosity::Debug => log::LevelFilter::Debug,
        }
    }
}

impl From<bool> for Verbosity {
    fn from(verbose: bool) -> Self {
        if verbose {
            Verbosity::Debug
        } else {
            Verbosity::Quiet
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Verbosity;

    #[test]
    fn verbose_flag_raises_the_filter() {
        assert_eq!(Verbosity::default(), Verbosity::Quiet);
        assert_eq!(Verbosity::from(false).level_filter(), log::LevelFilter::Info);
        assert!(Verbosity::from(true).is_debug());
        assert_eq!(Verbosity::from(true).level_filter(), log::LevelFilter::Debug);
    }
}
