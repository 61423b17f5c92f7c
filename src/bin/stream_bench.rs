use anyhow::Result;
use rand::Rng;
use std::time::Instant;

use facelink::codec::{CodecState, CompressedFrame, DecoderState};
use facelink::config::Config;
use facelink::landmark::{LandmarkSet, Point3D};
use facelink::matrix::PoseTransform;
use facelink::normalize::Normalizer;

const CONFIG_PATH: &str = "config.toml";
const FRAMES: usize = 300;
/// フレーム間ジッタの振幅（ピクセル）
/// 正規化スケール倍された二階差分が i16 に収まる範囲に抑える
const JITTER: f32 = 0.02;

/// 頭部の揺れを模した正弦ドリフトの振幅（ピクセル）
const SWAY: f32 = 6.0;

fn main() -> Result<()> {
    env_logger::init();
    let config = Config::load_or_default(CONFIG_PATH);

    println!("Stream Bench - normalize + delta-delta codec");
    println!("Landmarks: {}", config.stream.landmark_count);
    println!(
        "Normalize: target_size={}, preserve_aspect_ratio={}, rotate_to_front={}",
        config.normalize.target_size,
        config.normalize.preserve_aspect_ratio,
        config.normalize.rotate_to_front
    );
    println!("Frames: {} @ {} FPS simulated", FRAMES, config.stream.target_fps);
    println!();

    let base = synthetic_face(config.stream.landmark_count);
    let transform = identity_transform();
    let normalizer = Normalizer::new(config.normalize);
    let mut codec = CodecState::new();
    let mut decoder = DecoderState::new();
    let mut rng = rand::rng();

    let mut total_bytes = 0usize;
    let mut delta_bytes = 0usize;
    let mut delta_frames = 0usize;
    let mut max_drift = 0.0f32;

    let start = Instant::now();
    for f in 0..FRAMES {
        let captured = perturb(&base, f, JITTER, SWAY, &mut rng);
        let frame = normalizer.normalize(&captured, Some(&transform))?;

        let compressed = codec.encode(&frame.normalized);
        let payload = compressed.to_bytes();
        total_bytes += payload.len();
        if let CompressedFrame::DeltaDelta(_) = &compressed {
            delta_bytes += payload.len();
            delta_frames += 1;
        }

        // 受信側: ワイヤ経由でパースして復元し、ドリフトを計測
        let parsed = CompressedFrame::from_bytes(&payload)
            .ok_or_else(|| anyhow::anyhow!("malformed payload at frame {}", f))?;
        if let Some(decoded) = decoder.decode(&parsed) {
            for (d, o) in decoded.iter().zip(frame.normalized.iter()) {
                max_drift = max_drift
                    .max((d.x - o.x).abs())
                    .max((d.y - o.y).abs())
                    .max((d.z - o.z).abs());
            }
        }
    }
    let elapsed = start.elapsed();

    let avg_ms = elapsed.as_secs_f64() * 1000.0 / FRAMES as f64;
    let full_size = 1 + config.stream.landmark_count * 12;
    println!("Pipeline: {:.3}ms/frame = {:.0} FPS capacity", avg_ms, 1000.0 / avg_ms);
    println!("Full frame: {} bytes", full_size);
    if delta_frames > 0 {
        println!(
            "Delta frame: {} bytes avg ({} frames)",
            delta_bytes / delta_frames,
            delta_frames
        );
    }
    println!(
        "Stream: {} bytes total, {:.1} bytes/frame avg, ratio {:.3}",
        total_bytes,
        total_bytes as f64 / FRAMES as f64,
        codec.compression_ratio()
    );
    println!(
        "Bandwidth @ {} FPS: {:.1} kbit/s (full-only: {:.1} kbit/s)",
        config.stream.target_fps,
        total_bytes as f64 / FRAMES as f64 * config.stream.target_fps as f64 * 8.0 / 1000.0,
        full_size as f64 * config.stream.target_fps as f64 * 8.0 / 1000.0
    );
    println!("Decoder drift (max component): {:.5}", max_drift);

    Ok(())
}

/// 楕円体に載せた合成顔。ピクセル座標・カメラ中央想定
fn synthetic_face(count: usize) -> LandmarkSet {
    (0..count)
        .map(|i| {
            let t = i as f32 * 0.618;
            let u = (i as f32 / count.max(1) as f32) * std::f32::consts::PI;
            Point3D::new(
                320.0 + u.sin() * t.cos() * 70.0,
                240.0 + u.cos() * 90.0,
                u.sin() * t.sin() * 40.0,
            )
        })
        .collect()
}

/// ゆっくりした正弦の揺れ + フレームごとの小ジッタ
fn perturb(
    base: &LandmarkSet,
    frame: usize,
    jitter: f32,
    sway: f32,
    rng: &mut impl Rng,
) -> LandmarkSet {
    let phase = frame as f32 / 30.0 * std::f32::consts::TAU * 0.2;
    let dx = phase.sin() * sway;
    let dy = (phase * 0.7).cos() * sway * 0.5;
    base.iter()
        .map(|p| {
            Point3D::new(
                p.x + dx + rng.random_range(-jitter..=jitter),
                p.y + dy + rng.random_range(-jitter..=jitter),
                p.z + rng.random_range(-jitter..=jitter),
            )
        })
        .collect()
}

fn identity_transform() -> PoseTransform {
    let mut v = [0.0f32; 16];
    v[0] = 1.0;
    v[5] = 1.0;
    v[10] = 1.0;
    v[15] = 1.0;
    PoseTransform::Flat16(v)
}
