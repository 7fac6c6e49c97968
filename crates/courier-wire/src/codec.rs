// Async frame reading and writing with size limits.
//
// Generic over the I/O halves so the service, the client, and duplex-based
// tests share one implementation. Header layout is owned by `parse_header`
// and `encode_header` in the crate root.
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Error, Frame, HEADER_LEN, Request, Response, Result, encode_header, parse_header};

// Low-level frame reader with a max payload cap. Returns None when the peer
// closed the connection before a new frame began; EOF inside a frame is
// also treated as a close.
pub async fn read_frame<R>(
    recv: &mut R,
    max_payload_bytes: usize,
    scratch: &mut BytesMut,
) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    match recv.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }

    let (flags, length) = parse_header(&header)?;
    if length > max_payload_bytes {
        return Err(Error::PayloadTooLarge {
            got: length,
            limit: max_payload_bytes,
        });
    }
    scratch.clear();
    scratch.resize(length, 0u8);
    match recv.read_exact(&mut scratch[..]).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    Ok(Some(Frame {
        flags,
        payload: scratch.split().freeze(),
    }))
}

// Low-level frame writer.
pub async fn write_frame<W>(send: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let header = encode_header(frame.flags, frame.payload.len() as u32);
    send.write_all(&header).await?;
    send.write_all(&frame.payload).await?;
    send.flush().await?;
    Ok(())
}

// Helper to encode + write a single response envelope.
pub async fn write_response<W>(send: &mut W, response: &Response) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = response.encode()?;
    write_frame(send, &frame).await
}

// Helper to encode + write a single request envelope.
pub async fn write_request<W>(send: &mut W, request: &Request) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = request.encode()?;
    write_frame(send, &frame).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn frame_round_trips_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let request = Request::Ping {
            request_id: Some("r1".to_string()),
        };
        write_request(&mut client, &request).await.expect("write");

        let mut scratch = BytesMut::new();
        let frame = read_frame(&mut server, 64 * 1024, &mut scratch)
            .await
            .expect("read")
            .expect("frame");
        assert_eq!(Request::decode(&frame).expect("decode"), request);
    }

    #[tokio::test]
    async fn read_frame_returns_none_on_clean_close() {
        let (client, mut server) = tokio::io::duplex(1024);
        drop(client);
        let mut scratch = BytesMut::new();
        let frame = read_frame(&mut server, 1024, &mut scratch)
            .await
            .expect("read");
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn read_frame_rejects_oversized_payload() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let frame = Frame::new(0, Bytes::from_static(b"0123456789")).expect("frame");
        write_frame(&mut client, &frame).await.expect("write");

        let mut scratch = BytesMut::new();
        let err = read_frame(&mut server, 4, &mut scratch)
            .await
            .expect_err("oversized");
        assert!(matches!(
            err,
            Error::PayloadTooLarge { got: 10, limit: 4 }
        ));
    }
}
