use log::info;
use peca_ingest::av::{Channel, ChannelContentSink, ChannelContext, ContentSink, StopReason};
use peca_ingest::config::Config;
use peca_ingest::filter::{ContentFilter, CustomFilter, CustomFilterDescription};
use peca_ingest::format::ts::{
    TsPacketWriter, STREAM_ID_AUDIO, STREAM_ID_VIDEO, STREAM_TYPE_AAC, STREAM_TYPE_H264,
};
use peca_ingest::format::{default_factories, detect_content_type};
use std::error::Error;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A few seconds of synthetic TS, used when no file is given.
fn synthetic_stream() -> Vec<u8> {
    let mut writer = TsPacketWriter::new(0x1000);
    writer.add_stream(STREAM_TYPE_H264, 0x100).add_stream(STREAM_TYPE_AAC, 0x101);
    let mut data = writer.pat();
    data.extend(writer.pmt());
    for i in 0..300u32 {
        let video = vec![(i % 251) as u8; 4000];
        data.extend(writer.pes(0x100, STREAM_ID_VIDEO, i % 30 == 0, &video).concat());
        data.extend(writer.pes(0x101, STREAM_ID_AUDIO, false, &[0u8; 400]).concat());
    }
    data
}

// Usage: ingest_file [FILE] [FILTER COMMAND]
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let data = match args.next() {
        Some(path) if path != "-" => tokio::fs::read(&path).await?,
        _ => synthetic_stream(),
    };
    let filter_command = args.next();

    let config = Config::from_env();
    let factories = default_factories(&config);
    let (factory, found) =
        detect_content_type(&factories, &data).ok_or("unrecognized content type")?;
    info!("{}: {} ({})", factory.name(), found.content_type, found.mime_type);

    let channel = Arc::new(Channel::with_content_limit(usize::MAX));
    channel.set_recv_rate(Some(64_000.0));
    let mut sink: Arc<dyn ContentSink> = Arc::new(ChannelContentSink::new(channel.clone(), true));
    if let Some(command) = filter_command {
        let text = format!(
            "[[filter]]\nname = \"demo\"\ncommand = '{}'\nlogging = true\n",
            command
        );
        let base_path = std::env::current_dir()?;
        let description = CustomFilterDescription::parse(&text, &base_path)?.remove(0);
        let filter = CustomFilter::new(description, config.filter.clone());
        info!("piping through {}", filter.name());
        sink = filter.activate(sink);
    }

    let mut reader = factory.create(channel.clone());
    let mut input = &data[..];
    let outcome = reader.read(sink.as_ref(), &mut input, &CancellationToken::new()).await;
    sink.on_stop(StopReason::OffAir).await;
    info!("read loop ended: {:?}", outcome);

    let info = channel.channel_info();
    let contents = channel.contents();
    info!(
        "type {:?}, {} kbps, header {} bytes, {} contents, {} bytes total",
        info.content_type(),
        info.bitrate(),
        channel.content_header().map_or(0, |h| h.len()),
        contents.len(),
        channel.content_position()
    );
    Ok(())
}
