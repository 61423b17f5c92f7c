use thiserror::Error;

/// 正規化・行列処理で発生するエラー
///
/// いずれも呼び出し側で回復可能。フレーム単位でスキップまたは
/// フォールバックし、プロセスを落とす理由にはならない。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FacelinkError {
    /// ランドマークが0個。そのフレームはスキップする
    #[error("landmark set is empty")]
    EmptyInput,

    /// ポーズ変換の形式が認識できない。回転補正なしで続行する
    #[error("unsupported pose transform format: expected 16-element row-major array")]
    UnsupportedFormat,

    /// 回転行列が特異で逆行列を計算できない
    #[error("rotation matrix is singular (det = {det:e})")]
    SingularMatrix { det: f32 },
}
