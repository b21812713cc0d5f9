//! One-shot invocation from a line of input.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::{decode_invocation, IngressError};
use crate::invoker::FunctionInvoker;
use crate::request::CoordinatedRequest;

/// Read one line, invoke the function with it and write the output.
///
/// The line terminator is not part of the input. Nothing is written when
/// the invocation fails.
pub async fn exec_from_reader<R, W>(
    invoker: &dyn FunctionInvoker,
    mut reader: R,
    writer: &mut W,
) -> Result<(), IngressError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let input = line.trim_end_matches(['\n', '\r']).as_bytes().to_vec();

    let req = CoordinatedRequest::from_input(uuid::Uuid::new_v4().to_string(), input);
    debug!(request_id = %req.id, "Invoking function from stdin");

    let resp = decode_invocation(invoker.invoke(&req).await)?;
    writer.write_all(&resp.output).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::{FnInvoker, Invocation};
    use crate::sequence::RunErr;

    fn shout() -> FnInvoker {
        FnInvoker::from_output(|req| Ok(req.body.to_ascii_uppercase()))
    }

    #[tokio::test]
    async fn test_exec_reads_first_line_only() {
        let mut out = Vec::new();
        exec_from_reader(&shout(), &b"hello\nworld\n"[..], &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"HELLO");
    }

    #[tokio::test]
    async fn test_exec_without_newline() {
        let mut out = Vec::new();
        exec_from_reader(&shout(), &b"quiet"[..], &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"QUIET");
    }

    #[tokio::test]
    async fn test_exec_sees_synthetic_request() {
        let invoker = FnInvoker::from_output(|req| {
            assert_eq!(req.method, "POST");
            assert_eq!(req.url, "/");
            assert!(req.sequence_json.is_none());
            Ok(Vec::new())
        });
        let mut out = Vec::new();
        exec_from_reader(&invoker, &b"x\n"[..], &mut out).await.unwrap();
    }

    #[tokio::test]
    async fn test_exec_runtime_failure_writes_nothing() {
        let invoker = FnInvoker::from_output(|_| Err(RunErr::new(2, "nope")));
        let mut out = Vec::new();
        let err = exec_from_reader(&invoker, &b"x\n"[..], &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, IngressError::Runtime(e) if e.code == 2));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_exec_execution_failure() {
        let invoker = FnInvoker::new(|_| Invocation::ExecutionFailure("gone".to_string()));
        let mut out = Vec::new();
        let err = exec_from_reader(&invoker, &b"x\n"[..], &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, IngressError::Execution(_)));
    }
}
