use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Read buffer used when hashing staged files
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Hex encoded MD5 digest of `content`.
pub fn content_digest(content: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(content);
    faster_hex::hex_string(&hasher.finalize())
}

/// Streams `reader` to its end, returning the hex encoded MD5 digest and the
/// number of bytes read.
pub async fn digest_reader<R>(reader: &mut R) -> std::io::Result<(String, u64)>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    let mut size = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }

    Ok((faster_hex::hex_string(&hasher.finalize()), size))
}
