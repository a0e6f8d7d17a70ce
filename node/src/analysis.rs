// Block-generation latency recording for the analyze benchmark.

use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Default directory for block-generation timing files.
pub const GEN_TIME_DIR: &str = "data/gen_time";

/// Writes one timing record: a file named by the hex identity containing
/// `hex_identity,elapsed_nanoseconds`. Failures are logged, never fatal.
pub fn save_block_gen_time(dir: &Path, identity: &[u8], elapsed: Duration) {
    let hex_identity = hex::encode(identity);

    if let Err(err) = fs::create_dir_all(dir) {
        warn!(error = %err, "cannot save block generation time");
        return;
    }
    let line = format!("{},{}\n", hex_identity, elapsed.as_nanos());
    if let Err(err) = fs::write(dir.join(&hex_identity), line) {
        warn!(error = %err, "cannot save block generation time");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_format() {
        let dir = std::env::temp_dir().join(format!("fleet-gen-time-{}", rand::random::<u64>()));

        save_block_gen_time(&dir, &[0xAB, 0xCD], Duration::from_nanos(1_234_567));
        let contents = fs::read_to_string(dir.join("abcd")).unwrap();
        assert_eq!(contents, "abcd,1234567\n");

        let _ = fs::remove_dir_all(&dir);
    }
}
