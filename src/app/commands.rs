use super::config::{
    Cli, Command, LookupInvocation, QueryInvocation, SendInput, SendInvocation,
};
use crate::domain::DevoError;
use crate::lookup::LookupSession;
use crate::query::{Processor, QueryClient, QueryResponse, Record};
use crate::sender::{Event, SendOptions, Sender};
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// Runs the subcommand selected on the command line.
pub async fn execute(cli: Cli) -> Result<(), DevoError> {
    let profile = cli.file_profile()?;
    match cli.command {
        Command::Query(args) => run_query(args.resolve(&profile.api)?).await,
        Command::Send(args) => run_send(args.resolve(&profile.sender)?).await,
        Command::Lookup(args) => run_lookup(args.resolve(&profile.sender, &profile.lookup)?).await,
    }
}

async fn write_record<W>(out: &mut W, record: Record) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    match record {
        Record::Text(text) => {
            out.write_all(text.as_bytes()).await?;
            out.write_all(b"\n").await
        }
        Record::Json(value) => {
            out.write_all(value.to_string().as_bytes()).await?;
            out.write_all(b"\n").await
        }
        Record::Bytes(bytes) => out.write_all(&bytes).await,
    }
}

pub async fn run_query(invocation: QueryInvocation) -> Result<(), DevoError> {
    let client = QueryClient::new(invocation.client)?;
    let mut out: Box<dyn AsyncWrite + Unpin + Send> = match &invocation.output {
        Some(path) => Box::new(tokio::fs::File::create(path).await?),
        None => Box::new(tokio::io::stdout()),
    };

    let mut written = 0usize;
    match client.query(&invocation.spec, Processor::Default).await? {
        QueryResponse::Records(records) => {
            for record in records {
                write_record(&mut out, record).await?;
                written += 1;
            }
        }
        QueryResponse::Stream(mut stream) => {
            while let Some(record) = stream.next().await {
                write_record(&mut out, record?).await?;
                written += 1;
            }
        }
    }
    out.flush().await?;

    info!(
        records = written,
        response = %invocation.spec.response,
        "query finished"
    );
    Ok(())
}

async fn send_input(
    sender: &Sender,
    tag: &str,
    input: &SendInput,
    options: SendOptions,
) -> Result<usize, DevoError> {
    match input {
        SendInput::Line(line) => {
            sender
                .send_event(Event::new(tag, line.clone()), options)
                .await?;
            Ok(1)
        }
        SendInput::File(path) => {
            let content = tokio::fs::read(path).await?;
            debug!(path = %path.display(), bytes = content.len(), "read event file");
            if options.multiline {
                sender.send_event(Event::new(tag, content), options).await?;
                return Ok(1);
            }

            let mut events = 0;
            for line in content.split(|b| *b == b'\n') {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                if line.is_empty() {
                    continue;
                }
                sender
                    .send_event(Event::new(tag, Bytes::copy_from_slice(line)), options)
                    .await?;
                events += 1;
            }
            Ok(events)
        }
    }
}

pub async fn run_send(invocation: SendInvocation) -> Result<(), DevoError> {
    let sender = Sender::new(invocation.config, invocation.options).await?;
    let sent = send_input(
        &sender,
        &invocation.tag,
        &invocation.input,
        invocation.send_options,
    )
    .await;
    let closed = sender.close().await;
    let sent = sent?;
    closed?;

    let stats = sender.stats().await;
    info!(
        events = sent,
        tag = %invocation.tag,
        bytes_written = stats.bytes_written,
        batches = stats.batches_flushed,
        "events sent"
    );
    Ok(())
}

pub async fn run_lookup(invocation: LookupInvocation) -> Result<(), DevoError> {
    let sender = Sender::new(invocation.config, invocation.options).await?;

    let mut session = LookupSession::new(&sender, invocation.name, invocation.action)
        .with_delay(invocation.delay)
        .with_escape_quotes(invocation.escape_quotes);
    if let Some(tag) = invocation.historic_tag {
        session = session.with_historic_tag(tag);
    }

    let rows = session.send_csv(&invocation.file, &invocation.csv).await;
    let closed = sender.close().await;
    let rows = rows?;
    closed?;

    info!(rows, file = %invocation.file.display(), "lookup uploaded");
    Ok(())
}
