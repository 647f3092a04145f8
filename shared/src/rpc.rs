//! One-shot remote call: connect, write one request frame, read one
//! response frame, all under an explicit deadline. In-flight calls cannot
//! be cancelled; a peer that hangs surfaces as a timeout once the deadline
//! passes, and a peer that is gone surfaces as an i/o error.

use crate::codec::{read_frame, write_frame};
use crate::error::GameError;
use crate::protocol::{Request, Response};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

pub async fn call(
    addr: SocketAddr,
    request: &Request,
    deadline: Duration,
) -> Result<Response, GameError> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        write_frame(&mut stream, request).await?;
        read_frame::<_, Response>(&mut stream).await
    };
    match timeout(deadline, exchange).await {
        Ok(result) => result,
        Err(_) => Err(GameError::Timeout(addr)),
    }
}
