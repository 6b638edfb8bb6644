use bytes::BytesMut;
use caxy_http::ClientStream;
use tokio::io::AsyncReadExt;
use tokio::time::{timeout, Duration};

pub(crate) enum ReadOutcome {
    Read(usize),
    Timeout,
}

pub(crate) async fn read_more(
    stream: &mut dyn ClientStream,
    buf: &mut BytesMut,
    timeout_dur: Duration,
) -> anyhow::Result<ReadOutcome> {
    let mut tmp = [0u8; 4096];
    match timeout(timeout_dur, stream.read(&mut tmp)).await {
        Ok(res) => {
            let n = res?;
            if n > 0 {
                buf.extend_from_slice(&tmp[..n]);
            }
            Ok(ReadOutcome::Read(n))
        }
        Err(_) => Ok(ReadOutcome::Timeout),
    }
}
