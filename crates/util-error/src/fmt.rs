use std::error::Error;
use std::fmt;

/// Formats an error with its whole `source()` chain on one line
///
/// `a: b: c`, so it fits in a single structured log field.
pub struct FmtCompactError<'e, E: ?Sized>(&'e E);

impl<E> fmt::Display for FmtCompactError<'_, E>
where
    E: Error + ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {err}")?;
            source = err.source();
        }
        Ok(())
    }
}

pub trait FmtCompact {
    fn fmt_compact(&self) -> FmtCompactError<'_, Self>;
}

impl<E> FmtCompact for E
where
    E: Error + ?Sized,
{
    fn fmt_compact(&self) -> FmtCompactError<'_, Self> {
        FmtCompactError(self)
    }
}

#[cfg(test)]
mod tests {
    use snafu::{ResultExt as _, Snafu};

    use super::FmtCompact as _;

    #[derive(Debug, Snafu)]
    #[snafu(display("inner"))]
    struct Inner;

    #[derive(Debug, Snafu)]
    #[snafu(display("outer"))]
    struct Outer {
        source: Inner,
    }

    #[test]
    fn fmt_compact_joins_sources() {
        let err = Err::<(), _>(Inner).context(OuterSnafu).unwrap_err();
        assert_eq!(err.fmt_compact().to_string(), "outer: inner");
    }
}
