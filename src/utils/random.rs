/// Uniformly-ish random value in `0..max`, straight from the OS.
pub fn get_random_u128(max: u128) -> Result<u128, getrandom::Error>
{
        let mut buf = [0u8; 16];

        getrandom::fill(&mut buf)?;

        Ok(u128::from_ne_bytes(buf) % max.max(1))
}

#[cfg(test)]
mod tests
{
        use super::*;

        #[test]
        fn stays_below_max()
        {
                for _ in 0..32
                {
                        assert!(get_random_u128(5).unwrap() < 5);
                }

                assert_eq!(get_random_u128(0).unwrap(), 0);
        }
}
