macro_rules! time_info {
    ($name:expr, $f:block) => {{
        let start = std::time::Instant::now();
        let result = $f;
        let end = std::time::Instant::now();
        log::info!("{} (took {:?})", $name, end.duration_since(start));
        result
    }};
}

#[allow(unused_macros)]
macro_rules! time_debug {
    ($name:expr, $f:block) => {{
        let start = std::time::Instant::now();
        let result = $f;
        let end = std::time::Instant::now();
        log::debug!("{} (took {:?})", $name, end.duration_since(start));
        result
    }};
}

pub fn next_multiple_of(value: u64, base: u64) -> u64 {
    match value % base {
        0 => value,
        r => value + (base - r),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_to_the_next_multiple() {
        assert_eq!(next_multiple_of(0, 4096), 0);
        assert_eq!(next_multiple_of(1, 4096), 4096);
        assert_eq!(next_multiple_of(4096, 4096), 4096);
        assert_eq!(next_multiple_of(4097, 4096), 8192);
    }
}
