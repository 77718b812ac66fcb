use peca_ingest::av::{Channel, ChannelContentSink, ChannelContext, CollectingSink, SinkEvent};
use peca_ingest::config::{Config, TsConfig};
use peca_ingest::format::ts::{
    TSContentReader, TsPacketWriter, STREAM_ID_AUDIO, STREAM_ID_VIDEO, STREAM_TYPE_AAC,
    STREAM_TYPE_H264, TS_PACKET_SIZE,
};
use peca_ingest::format::{default_factories, detect_content_type, ContentReader, ReadOutcome};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const VIDEO_PID: u16 = 0x100;
const AUDIO_PID: u16 = 0x101;

fn stream(units: usize) -> Vec<u8> {
    let mut writer = TsPacketWriter::new(0x1000);
    writer
        .add_stream(STREAM_TYPE_H264, VIDEO_PID)
        .add_stream(STREAM_TYPE_AAC, AUDIO_PID);
    let mut out = writer.pat();
    out.extend(writer.pmt());
    for i in 0..units {
        let packets = if i % 2 == 0 {
            writer.pes(VIDEO_PID, STREAM_ID_VIDEO, i % 4 == 0, &vec![i as u8; 1200])
        } else {
            writer.pes(AUDIO_PID, STREAM_ID_AUDIO, false, &vec![i as u8; 300])
        };
        out.extend(packets.concat());
    }
    out
}

fn immediate() -> Config {
    Config {
        ts: TsConfig {
            flush_interval_ms: 0,
            ..TsConfig::default()
        },
        ..Config::default()
    }
}

#[tokio::test]
async fn test_detect_and_read_into_channel() {
    let data = stream(12);
    let config = immediate();
    let factories = default_factories(&config);
    let (factory, found) = detect_content_type(&factories, &data).expect("TS not detected");
    assert_eq!(found.content_type, "TS");
    assert_eq!(found.mime_type, "video/mp2ts");

    let channel = Arc::new(Channel::with_content_limit(1000));
    channel.set_recv_rate(Some(250_000.0));
    let sink = ChannelContentSink::new(channel.clone(), true);
    let mut reader = factory.create(channel.clone());
    assert_eq!(reader.name(), "MPEG-TS (TS)");

    let mut input = &data[..];
    let outcome = reader.read(&sink, &mut input, &CancellationToken::new()).await;
    assert!(outcome.is_end_of_stream());

    let header = channel.content_header().expect("no header stored");
    assert_eq!(header.position, 0);
    assert_eq!(header.len(), 2 * TS_PACKET_SIZE);

    // Header and contents cover the whole input, in order and without gaps.
    let contents = channel.contents();
    let mut position = header.end_position();
    for content in &contents {
        assert_eq!(content.position, position);
        assert_eq!(content.stream, header.stream);
        assert_eq!(content.len() % TS_PACKET_SIZE, 0);
        position = content.end_position();
    }
    assert_eq!(position, data.len() as u64);
    assert_eq!(channel.content_position(), data.len() as u64);

    let info = channel.channel_info();
    assert_eq!(info.content_type(), Some("TS"));
    assert_eq!(info.mime_type(), "video/mp2ts");
    assert_eq!(info.content_extension(), ".ts");
    assert_eq!(info.bitrate(), 2000);
}

#[tokio::test]
async fn test_second_session_continues_positions() {
    let channel = Arc::new(Channel::with_content_limit(1000));
    let sink = ChannelContentSink::new(channel.clone(), true);
    let first = stream(4);

    let mut reader = TSContentReader::new(channel.clone(), immediate().ts);
    let mut input = &first[..];
    reader.read(&sink, &mut input, &CancellationToken::new()).await;
    let first_stream = channel.content_header().map(|h| h.stream);

    let second = stream(4);
    let mut reader = TSContentReader::new(channel.clone(), immediate().ts);
    let mut input = &second[..];
    reader.read(&sink, &mut input, &CancellationToken::new()).await;

    let header = channel.content_header().expect("no header stored");
    assert_ne!(Some(header.stream), first_stream);
    assert_eq!(header.position, first.len() as u64);
    assert_eq!(channel.content_position(), (first.len() + second.len()) as u64);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let data = stream(4);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let sink = CollectingSink::new();
    let mut reader = TSContentReader::new(Arc::new(Channel::new()), immediate().ts);
    let mut input = &data[..];
    let outcome = reader.read(&sink, &mut input, &cancel).await;
    assert!(matches!(outcome, ReadOutcome::Cancelled));
    assert!(sink.contents().is_empty());
    assert!(!sink.events().iter().any(|e| matches!(e, SinkEvent::Stop(_))));
}

#[test]
fn test_unknown_content_is_not_detected() {
    let factories = default_factories(&Config::default());
    assert!(detect_content_type(&factories, b"ICY 200 OK\r\n").is_none());
    assert!(detect_content_type(&factories, &[]).is_none());
}
