use {super::*, scrypt::Params};

/// Scrypt(N=1024, r=1, p=1) per RFC 7914, as used by Litecoin and its forks
/// to hash the 80-byte block header (both password and salt).
pub fn hash(input: &[u8]) -> crate::Result<[u8; 32]> {
    let params = Params::new(10, 1, 1, 32).map_err(|err| anyhow!("invalid scrypt params: {err}"))?;

    let mut output = [0u8; 32];
    scrypt::scrypt(input, input, &params, &mut output)
        .map_err(|err| anyhow!("scrypt hash failed: {err}"))?;

    Ok(output)
}
