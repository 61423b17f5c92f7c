//! Delta-delta codec for streaming normalized landmark frames.
//!
//! Consecutive ~33ms frames move very little, so the second finite
//! difference of each coordinate is near zero and quantizes well.
//! The first frame of a session goes out as a full snapshot; every
//! later frame is a quantized second difference.

use bytes::{Buf, BufMut, BytesMut};

use crate::landmark::{LandmarkSet, Point3D};

/// 量子化スケール（1e-4 精度）
pub const QUANT_SCALE: f32 = 10_000.0;

/// フレーム種別タグ: 全スナップショット
pub const FRAME_TAG_FULL: u8 = 0x00;
/// フレーム種別タグ: 量子化済み二階差分
pub const FRAME_TAG_DELTA_DELTA: u8 = 0x01;

/// 圧縮済みフレーム
#[derive(Debug, Clone, PartialEq)]
pub enum CompressedFrame {
    /// 全ランドマークのスナップショット
    Full(LandmarkSet),
    /// 平坦化した x/y/z 成分ごとの量子化二階差分（ランドマークあたり3値）
    DeltaDelta(Vec<i16>),
}

impl CompressedFrame {
    /// ワイヤレイアウトへエンコードする（リトルエンディアン）
    ///
    /// Full: タグ1バイト + ランドマークごとに f32 ×3。点数は
    /// ペイロード長から暗黙に決まる。
    /// DeltaDelta: タグ1バイト + u16 の値数 + i16 の値列。
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Full(points) => {
                let mut buf = BytesMut::with_capacity(1 + points.len() * 12);
                buf.put_u8(FRAME_TAG_FULL);
                for p in points.iter() {
                    buf.put_f32_le(p.x);
                    buf.put_f32_le(p.y);
                    buf.put_f32_le(p.z);
                }
                buf.to_vec()
            }
            Self::DeltaDelta(values) => {
                let mut buf = BytesMut::with_capacity(3 + values.len() * 2);
                buf.put_u8(FRAME_TAG_DELTA_DELTA);
                buf.put_u16_le(values.len() as u16);
                for &v in values {
                    buf.put_i16_le(v);
                }
                buf.to_vec()
            }
        }
    }

    /// ワイヤレイアウトからパースする
    ///
    /// タグ不明・長さ不整合などの不正ペイロードは None。
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let mut buf = data;
        if buf.remaining() < 1 {
            return None;
        }
        match buf.get_u8() {
            FRAME_TAG_FULL => {
                if buf.remaining() % 12 != 0 {
                    return None;
                }
                let count = buf.remaining() / 12;
                let mut points = Vec::with_capacity(count);
                for _ in 0..count {
                    let x = buf.get_f32_le();
                    let y = buf.get_f32_le();
                    let z = buf.get_f32_le();
                    points.push(Point3D::new(x, y, z));
                }
                Some(Self::Full(LandmarkSet::new(points)))
            }
            FRAME_TAG_DELTA_DELTA => {
                if buf.remaining() < 2 {
                    return None;
                }
                let count = buf.get_u16_le() as usize;
                if buf.remaining() != count * 2 {
                    return None;
                }
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(buf.get_i16_le());
                }
                Some(Self::DeltaDelta(values))
            }
            _ => None,
        }
    }

    /// エンコード後のバイト数
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Full(points) => 1 + points.len() * 12,
            Self::DeltaDelta(values) => 3 + values.len() * 2,
        }
    }
}

fn quantize(v: f32) -> i16 {
    (v * QUANT_SCALE)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// 量子化の逆変換
pub fn dequantize(q: i16) -> f32 {
    q as f32 / QUANT_SCALE
}

/// ストリーミングセッションごとの差分履歴を持つエンコーダ
///
/// encode はキャプチャ順に1フレーム1回だけ呼ぶこと。並行・順序
/// 乱れの呼び出しは差分履歴を壊す。セッション境界では reset を
/// 呼んで履歴を明示的に捨てる（時間経過で消えることはない）。
#[derive(Debug, Default)]
pub struct CodecState {
    previous_frame: Option<LandmarkSet>,
    previous_first_diff: Option<Vec<f32>>,
    last_payload: Option<PayloadStats>,
}

#[derive(Debug, Clone, Copy)]
struct PayloadStats {
    bytes: usize,
    point_count: usize,
}

impl CodecState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 1フレーム分のランドマークを圧縮する
    ///
    /// 初回（または reset 直後）は Full、以降は量子化二階差分。
    /// 点数が前フレームと違う場合は短い方に切り詰めて警告を出す。
    pub fn encode(&mut self, points: &LandmarkSet) -> CompressedFrame {
        let prev = match &self.previous_frame {
            None => {
                self.previous_frame = Some(points.clone());
                self.previous_first_diff = None;
                let frame = CompressedFrame::Full(points.clone());
                self.last_payload = Some(PayloadStats {
                    bytes: frame.byte_len(),
                    point_count: points.len(),
                });
                return frame;
            }
            Some(prev) => prev,
        };

        let overlap = prev.len().min(points.len());
        if prev.len() != points.len() {
            log::warn!(
                "landmark count changed between frames ({} -> {}), truncating delta to {} points",
                prev.len(),
                points.len(),
                overlap
            );
        }

        // 一階差分（x/y/z 平坦化）
        let mut first_diff = Vec::with_capacity(overlap * 3);
        for i in 0..overlap {
            let (cur, old) = (&points[i], &prev[i]);
            first_diff.push(cur.x - old.x);
            first_diff.push(cur.y - old.y);
            first_diff.push(cur.z - old.z);
        }

        // 二階差分。前回の一階差分が無ければ一階差分そのもの
        let quantized: Vec<i16> = match &self.previous_first_diff {
            Some(prev_diff) => {
                let n = first_diff.len().min(prev_diff.len());
                (0..n)
                    .map(|i| quantize(first_diff[i] - prev_diff[i]))
                    .collect()
            }
            None => first_diff.iter().map(|&d| quantize(d)).collect(),
        };

        self.previous_frame = Some(points.clone());
        self.previous_first_diff = Some(first_diff);
        let frame = CompressedFrame::DeltaDelta(quantized);
        self.last_payload = Some(PayloadStats {
            bytes: frame.byte_len(),
            point_count: points.len(),
        });
        frame
    }

    /// 履歴を破棄する。次の encode は必ず Full になる
    pub fn reset(&mut self) {
        self.previous_frame = None;
        self.previous_first_diff = None;
        self.last_payload = None;
    }

    /// 直近のペイロードサイズと同点数の Full サイズの比
    ///
    /// まだ何もエンコードしていなければ 0
    pub fn compression_ratio(&self) -> f32 {
        match self.last_payload {
            Some(stats) => {
                let full = 1 + stats.point_count * 12;
                stats.bytes as f32 / full as f32
            }
            None => 0.0,
        }
    }
}

/// 受信側の等価コーデック
///
/// エンコーダと同じ二段階の差分履歴を独立に辿り、量子化の逆変換で
/// 絶対座標を復元する。履歴は復元値（量子化誤差込み）で更新する。
#[derive(Debug, Default)]
pub struct DecoderState {
    previous_coords: Option<Vec<f32>>,
    previous_first_diff: Option<Vec<f32>>,
}

impl DecoderState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 圧縮フレームを絶対座標へ復元する
    ///
    /// Full 受信前に DeltaDelta が来た場合は None（呼び出し順の
    /// 誤り。次の Full まで読み飛ばして回復する）。
    pub fn decode(&mut self, frame: &CompressedFrame) -> Option<LandmarkSet> {
        match frame {
            CompressedFrame::Full(points) => {
                self.previous_coords = Some(flatten(points));
                self.previous_first_diff = None;
                Some(points.clone())
            }
            CompressedFrame::DeltaDelta(values) => {
                let prev = self.previous_coords.as_ref()?;

                let mut n = values.len().min(prev.len());
                if let Some(pd) = &self.previous_first_diff {
                    n = n.min(pd.len());
                }

                let first_diff: Vec<f32> = match &self.previous_first_diff {
                    Some(pd) => (0..n).map(|i| pd[i] + dequantize(values[i])).collect(),
                    None => values[..n].iter().map(|&q| dequantize(q)).collect(),
                };

                let coords: Vec<f32> = (0..n).map(|i| prev[i] + first_diff[i]).collect();
                let points = unflatten(&coords);

                self.previous_coords = Some(coords);
                self.previous_first_diff = Some(first_diff);
                Some(points)
            }
        }
    }

    /// 履歴を破棄する。送信側の reset と対で呼ぶ
    pub fn reset(&mut self) {
        self.previous_coords = None;
        self.previous_first_diff = None;
    }
}

fn flatten(points: &LandmarkSet) -> Vec<f32> {
    let mut out = Vec::with_capacity(points.len() * 3);
    for p in points.iter() {
        out.push(p.x);
        out.push(p.y);
        out.push(p.z);
    }
    out
}

fn unflatten(coords: &[f32]) -> LandmarkSet {
    coords
        .chunks_exact(3)
        .map(|c| Point3D::new(c[0], c[1], c[2]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(points: &[(f32, f32, f32)]) -> LandmarkSet {
        points
            .iter()
            .map(|&(x, y, z)| Point3D::new(x, y, z))
            .collect()
    }

    /// 決定的な小ジッタ付きフレーム列
    fn jittered_frames(count: usize, points: usize) -> Vec<LandmarkSet> {
        (0..count)
            .map(|f| {
                (0..points)
                    .map(|i| {
                        let t = (f * points + i) as f32 * 0.37;
                        Point3D::new(
                            i as f32 * 10.0 + t.sin() * 0.4,
                            i as f32 * 5.0 + t.cos() * 0.4,
                            (t * 0.5).sin() * 0.3,
                        )
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_first_encode_is_full() {
        let mut codec = CodecState::new();
        let points = set(&[(1.0, 2.0, 3.0)]);
        match codec.encode(&points) {
            CompressedFrame::Full(p) => assert_eq!(p, points),
            other => panic!("expected Full, got {:?}", other),
        }
    }

    #[test]
    fn test_second_encode_is_delta_delta() {
        let mut codec = CodecState::new();
        codec.encode(&set(&[(0.0, 0.0, 0.0)]));
        let frame = codec.encode(&set(&[(0.1, 0.2, -0.3)]));
        match frame {
            CompressedFrame::DeltaDelta(values) => {
                // 2フレーム目は一階差分そのものが量子化される
                assert_eq!(values, vec![1000, 2000, -3000]);
            }
            other => panic!("expected DeltaDelta, got {:?}", other),
        }
    }

    #[test]
    fn test_third_encode_is_second_difference() {
        let mut codec = CodecState::new();
        codec.encode(&set(&[(0.0, 0.0, 0.0)]));
        codec.encode(&set(&[(0.1, 0.0, 0.0)]));
        // 等速運動なら二階差分はゼロ
        let frame = codec.encode(&set(&[(0.2, 0.0, 0.0)]));
        match frame {
            CompressedFrame::DeltaDelta(values) => assert_eq!(values, vec![0, 0, 0]),
            other => panic!("expected DeltaDelta, got {:?}", other),
        }
    }

    #[test]
    fn test_reset_forces_full() {
        let mut codec = CodecState::new();
        let points = set(&[(1.0, 1.0, 1.0)]);
        codec.encode(&points);
        codec.encode(&points);
        codec.reset();
        assert!(matches!(codec.encode(&points), CompressedFrame::Full(_)));
        assert!(matches!(
            codec.encode(&points),
            CompressedFrame::DeltaDelta(_)
        ));
    }

    #[test]
    fn test_quantization_clamps_to_i16() {
        let mut codec = CodecState::new();
        codec.encode(&set(&[(0.0, 0.0, 0.0)]));
        // 10.0 * 10000 = 100000 は i16 に収まらない
        let frame = codec.encode(&set(&[(10.0, -10.0, 0.0)]));
        match frame {
            CompressedFrame::DeltaDelta(values) => {
                assert_eq!(values[0], i16::MAX);
                assert_eq!(values[1], i16::MIN);
                assert_eq!(values[2], 0);
            }
            other => panic!("expected DeltaDelta, got {:?}", other),
        }
    }

    #[test]
    fn test_length_mismatch_truncates() {
        let mut codec = CodecState::new();
        codec.encode(&set(&[(0.0, 0.0, 0.0), (1.0, 1.0, 1.0)]));
        let frame = codec.encode(&set(&[(0.1, 0.0, 0.0)]));
        match frame {
            CompressedFrame::DeltaDelta(values) => assert_eq!(values.len(), 3),
            other => panic!("expected DeltaDelta, got {:?}", other),
        }
    }

    #[test]
    fn test_compression_ratio_before_encode() {
        assert_eq!(CodecState::new().compression_ratio(), 0.0);
    }

    #[test]
    fn test_compression_ratio_after_reset() {
        let mut codec = CodecState::new();
        codec.encode(&set(&[(0.0, 0.0, 0.0)]));
        codec.reset();
        assert_eq!(codec.compression_ratio(), 0.0);
    }

    #[test]
    fn test_compression_ratio_values() {
        let mut codec = CodecState::new();
        let frames = jittered_frames(2, 468);

        codec.encode(&frames[0]);
        // Full: 比は1
        assert!((codec.compression_ratio() - 1.0).abs() < 1e-6);

        codec.encode(&frames[1]);
        // DeltaDelta: (3 + 468*3*2) / (1 + 468*12)
        let expected = (3.0 + 468.0 * 6.0) / (1.0 + 468.0 * 12.0);
        assert!((codec.compression_ratio() - expected).abs() < 1e-6);
        assert!(codec.compression_ratio() < 0.51);
    }

    #[test]
    fn test_wire_layout_full() {
        let frame = CompressedFrame::Full(set(&[(1.0, 2.0, 3.0)]));
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), 13);
        assert_eq!(bytes[0], FRAME_TAG_FULL);
        assert_eq!(&bytes[1..5], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[5..9], &2.0f32.to_le_bytes());
        assert_eq!(&bytes[9..13], &3.0f32.to_le_bytes());
        assert_eq!(frame.byte_len(), 13);
    }

    #[test]
    fn test_wire_layout_delta_delta() {
        let frame = CompressedFrame::DeltaDelta(vec![-1, 300]);
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), 7);
        assert_eq!(bytes[0], FRAME_TAG_DELTA_DELTA);
        assert_eq!(&bytes[1..3], &2u16.to_le_bytes());
        assert_eq!(&bytes[3..5], &(-1i16).to_le_bytes());
        assert_eq!(&bytes[5..7], &300i16.to_le_bytes());
        assert_eq!(frame.byte_len(), 7);
    }

    #[test]
    fn test_wire_roundtrip() {
        let full = CompressedFrame::Full(set(&[(1.5, -2.5, 3.5), (0.0, 0.25, -0.125)]));
        assert_eq!(CompressedFrame::from_bytes(&full.to_bytes()), Some(full));

        let dd = CompressedFrame::DeltaDelta(vec![0, -32768, 32767, 42]);
        assert_eq!(CompressedFrame::from_bytes(&dd.to_bytes()), Some(dd));
    }

    #[test]
    fn test_from_bytes_malformed() {
        // 空
        assert_eq!(CompressedFrame::from_bytes(&[]), None);
        // 不明タグ
        assert_eq!(CompressedFrame::from_bytes(&[0x02]), None);
        // Full のペイロードが12の倍数でない
        assert_eq!(CompressedFrame::from_bytes(&[0x00, 1, 2, 3]), None);
        // DeltaDelta のカウントと実長の不一致
        assert_eq!(CompressedFrame::from_bytes(&[0x01, 2, 0, 1, 0]), None);
        // DeltaDelta でカウント自体が欠落
        assert_eq!(CompressedFrame::from_bytes(&[0x01]), None);
    }

    #[test]
    fn test_decoder_delta_before_full() {
        let mut decoder = DecoderState::new();
        let frame = CompressedFrame::DeltaDelta(vec![1, 2, 3]);
        assert!(decoder.decode(&frame).is_none());
    }

    #[test]
    fn test_roundtrip_sequence() {
        let frames = jittered_frames(10, 20);
        let mut codec = CodecState::new();
        let mut decoder = DecoderState::new();

        for (f, original) in frames.iter().enumerate() {
            let compressed = codec.encode(original);
            if f == 0 {
                assert!(matches!(compressed, CompressedFrame::Full(_)));
            } else {
                assert!(matches!(compressed, CompressedFrame::DeltaDelta(_)));
            }

            // ワイヤ経由で復元
            let parsed = CompressedFrame::from_bytes(&compressed.to_bytes()).unwrap();
            let decoded = decoder.decode(&parsed).unwrap();
            assert_eq!(decoded.len(), original.len());

            // 量子化誤差は二重積分で累積する。10フレームなら
            // 1成分あたり 0.5/10000 * 10*11/2 = 2.75e-3 が上界
            for (d, o) in decoded.iter().zip(original.iter()) {
                assert!((d.x - o.x).abs() < 5e-3, "frame {}: x drift {}", f, d.x - o.x);
                assert!((d.y - o.y).abs() < 5e-3, "frame {}: y drift {}", f, d.y - o.y);
                assert!((d.z - o.z).abs() < 5e-3, "frame {}: z drift {}", f, d.z - o.z);
            }
        }
    }

    #[test]
    fn test_roundtrip_after_reset() {
        let frames = jittered_frames(6, 8);
        let mut codec = CodecState::new();
        let mut decoder = DecoderState::new();

        for original in &frames[..3] {
            let c = codec.encode(original);
            decoder.decode(&c).unwrap();
        }

        // セッション境界: 双方 reset して履歴を切る
        codec.reset();
        decoder.reset();

        let compressed = codec.encode(&frames[3]);
        assert!(matches!(compressed, CompressedFrame::Full(_)));
        let decoded = decoder.decode(&compressed).unwrap();
        assert_eq!(decoded, frames[3]);
    }
}
