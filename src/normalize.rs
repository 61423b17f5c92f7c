use serde::Deserialize;

use crate::error::FacelinkError;
use crate::landmark::{index, BoundingBox3D, LandmarkSet, Point3D};
use crate::matrix::{self, HeadPose, PoseTransform};

/// これ未満のミッドライン長・ボックス辺は退化とみなしスケール1にする
const MIN_EXTENT: f32 = 1e-6;

/// 正規化パラメータ
#[derive(Debug, Clone, Deserialize)]
pub struct NormalizationParams {
    /// 正規化後のミッドライン長（正規化単位）
    #[serde(default = "default_target_size")]
    pub target_size: f32,
    /// true: ミッドライン基準の等方スケール
    /// false: 境界ボックスの最大辺を target_size に合わせる
    #[serde(default = "default_true")]
    pub preserve_aspect_ratio: bool,
    /// 境界ボックス中心を原点へ平行移動する
    #[serde(default = "default_true")]
    pub center_to_origin: bool,
    /// ポーズ変換がある場合のみ効果を持つ
    #[serde(default = "default_true")]
    pub rotate_to_front: bool,
}

fn default_target_size() -> f32 {
    500.0
}

fn default_true() -> bool {
    true
}

impl Default for NormalizationParams {
    fn default() -> Self {
        Self {
            target_size: default_target_size(),
            preserve_aspect_ratio: default_true(),
            center_to_origin: default_true(),
            rotate_to_front: default_true(),
        }
    }
}

/// 正規化済みフレーム
///
/// normalized は original に回転補正→センタリング→スケールを
/// この順で適用した結果。
#[derive(Debug, Clone)]
pub struct NormalizedFrame {
    pub original: LandmarkSet,
    pub normalized: LandmarkSet,
    /// 回転・センタリング後、スケール適用前の境界ボックス
    pub bounding_box: BoundingBox3D,
    /// 適用したスケール（等方なので全軸同値）
    pub scale_factor: Point3D,
    /// 行列由来または推定の頭部姿勢。推定は低精度
    pub rotation: HeadPose,
    /// センタリングで適用した平行移動量
    pub translation: Point3D,
}

/// 生ランドマークを正準表現へ変換する正規化器
///
/// 状態を持たないためストリームごとに共有しても安全。
pub struct Normalizer {
    params: NormalizationParams,
}

impl Normalizer {
    pub fn new(params: NormalizationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &NormalizationParams {
        &self.params
    }

    /// 1フレーム分のランドマークを正規化する
    ///
    /// ランドマークが0個なら EmptyInput。回転行列が特異な場合は
    /// 無補正の点とゼロ姿勢にフォールバックし、エラーにはしない。
    pub fn normalize(
        &self,
        landmarks: &LandmarkSet,
        transform: Option<&PoseTransform>,
    ) -> Result<NormalizedFrame, FacelinkError> {
        if landmarks.is_empty() {
            return Err(FacelinkError::EmptyInput);
        }

        // 1. 回転補正
        let mut rotation = match transform {
            Some(t) => matrix::euler_from_rotation(&matrix::normalize_columns(&t.rotation())),
            None => estimate_head_pose(landmarks),
        };

        let mut points = landmarks.clone();
        if self.params.rotate_to_front {
            if let Some(t) = transform {
                let r = matrix::normalize_columns(&t.rotation());
                // Y下向き正 → Y上向き正へ変換してから逆回転
                let adjusted = matrix::flip_y_convention(&r);
                match matrix::invert3x3(&adjusted) {
                    Ok(inv) => points = matrix::apply_rotation(landmarks, &inv),
                    Err(FacelinkError::SingularMatrix { det }) => {
                        log::warn!("singular pose rotation (det = {det:e}), skipping correction");
                        rotation = HeadPose::ZERO;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        // 2. センタリング
        let translation = if self.params.center_to_origin {
            let bbox = points.bounding_box().ok_or(FacelinkError::EmptyInput)?;
            let c = bbox.center;
            points = points
                .iter()
                .map(|p| Point3D::new(p.x - c.x, p.y - c.y, p.z - c.z))
                .collect();
            Point3D::new(-c.x, -c.y, -c.z)
        } else {
            Point3D::ZERO
        };

        // 3. 境界ボックス再計算（スケール前の値を下流へ返す）
        let bounding_box = points.bounding_box().ok_or(FacelinkError::EmptyInput)?;

        // 4. スケール正規化
        let scale = if self.params.preserve_aspect_ratio {
            let midline = midline_length(&points);
            if midline > MIN_EXTENT {
                self.params.target_size / midline
            } else {
                1.0
            }
        } else {
            let max_extent = bounding_box
                .width
                .max(bounding_box.height)
                .max(bounding_box.depth);
            if max_extent > MIN_EXTENT {
                self.params.target_size / max_extent
            } else {
                1.0
            }
        };
        points = points
            .iter()
            .map(|p| Point3D::new(p.x * scale, p.y * scale, p.z * scale))
            .collect();

        Ok(NormalizedFrame {
            original: landmarks.clone(),
            normalized: points,
            bounding_box,
            scale_factor: Point3D::new(scale, scale, scale),
            rotation,
            translation,
        })
    }
}

/// 上顔面トリオの重心から下顔面トリオの重心までの3D距離
///
/// 顔の大きさに対して不変な正規化単位。トリオのどれかが
/// 範囲外なら 0 を返し、スケールは1にフォールバックする。
fn midline_length(points: &LandmarkSet) -> f32 {
    let upper = points.centroid_of(&index::UPPER_MIDLINE);
    let lower = points.centroid_of(&index::LOWER_MIDLINE);
    match (upper, lower) {
        (Some(u), Some(l)) => u.distance(&l),
        _ => 0.0,
    }
}

/// ポーズ変換が無い場合の簡易頭部姿勢推定
///
/// 目尻・口角・鼻先の相対オフセットから arctangent で推定する。
/// 情報提供のみで座標には影響しない。行列由来の姿勢より低精度。
pub fn estimate_head_pose(points: &LandmarkSet) -> HeadPose {
    let (Some(left_eye), Some(right_eye), Some(mouth_left), Some(mouth_right), Some(nose)) = (
        points.get(index::LEFT_EYE_OUTER),
        points.get(index::RIGHT_EYE_OUTER),
        points.get(index::MOUTH_LEFT),
        points.get(index::MOUTH_RIGHT),
        points.get(index::NOSE_TIP),
    ) else {
        return HeadPose::ZERO;
    };

    // roll: 両目尻を結ぶ線の傾き
    let roll = (right_eye.y - left_eye.y)
        .atan2(right_eye.x - left_eye.x)
        .to_degrees();

    let eye_mid_x = (left_eye.x + right_eye.x) / 2.0;
    let eye_mid_y = (left_eye.y + right_eye.y) / 2.0;
    let eye_span = right_eye.x - left_eye.x;

    // yaw: 目の中点に対する鼻先の左右オフセット
    let yaw = if eye_span.abs() > MIN_EXTENT {
        ((nose.x - eye_mid_x) / (eye_span / 2.0)).atan().to_degrees()
    } else {
        0.0
    };

    // pitch: 目ラインと口ラインの中間に対する鼻先の上下オフセット
    let mouth_mid_y = (mouth_left.y + mouth_right.y) / 2.0;
    let face_height = mouth_mid_y - eye_mid_y;
    let pitch = if face_height.abs() > MIN_EXTENT {
        let face_mid_y = (eye_mid_y + mouth_mid_y) / 2.0;
        ((face_mid_y - nose.y) / face_height).atan().to_degrees()
    } else {
        0.0
    };

    HeadPose::new(yaw, pitch, roll)
}
