use nalgebra::{Matrix3, Vector3};

use crate::error::FacelinkError;
use crate::landmark::{LandmarkSet, Point3D};

/// 列の長さがこれ以下なら標準基底ベクトルに置き換える
const COLUMN_EPS: f32 = 1e-5;
/// 行列式の絶対値がこれ未満なら特異とみなす
const DET_EPS: f32 = 1e-10;

/// 検出器から渡されるカメラ→顔のポーズ変換
///
/// Flat16 は row-major として解釈する。column-major の検出器を
/// 繋ぐ場合は境界で転置してから渡すこと。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PoseTransform {
    /// 平坦な16要素配列 (row-major)
    Flat16([f32; 16]),
    /// 構造化済みの4×4行列 (行の配列)
    Matrix4x4([[f32; 4]; 4]),
}

impl PoseTransform {
    /// 生のバッファから構築。16要素でなければ UnsupportedFormat
    pub fn from_slice(values: &[f32]) -> Result<Self, FacelinkError> {
        let flat: [f32; 16] = values
            .try_into()
            .map_err(|_| FacelinkError::UnsupportedFormat)?;
        Ok(Self::Flat16(flat))
    }

    /// 左上3×3ブロックを回転行列として取り出す
    pub fn rotation(&self) -> Matrix3<f32> {
        match self {
            Self::Flat16(v) => Matrix3::new(
                v[0], v[1], v[2], //
                v[4], v[5], v[6], //
                v[8], v[9], v[10],
            ),
            Self::Matrix4x4(m) => Matrix3::new(
                m[0][0], m[0][1], m[0][2], //
                m[1][0], m[1][1], m[1][2], //
                m[2][0], m[2][1], m[2][2],
            ),
        }
    }
}

/// 各列をユークリッド長で割ってスケール成分を除去する
///
/// 上流の変換にスケールが混入していても正規直交に近づける。
/// 長さがほぼ0の列は対応する標準基底ベクトルに置き換える。
pub fn normalize_columns(m: &Matrix3<f32>) -> Matrix3<f32> {
    let mut out = *m;
    for c in 0..3 {
        let col = out.column(c).into_owned();
        let len = col.norm();
        if len > COLUMN_EPS {
            out.set_column(c, &(col / len));
        } else {
            let mut basis = Vector3::zeros();
            basis[c] = 1.0;
            out.set_column(c, &basis);
        }
    }
    out
}

/// 余因子行列による3×3逆行列
///
/// |det| < 1e-10 は SingularMatrix。閾値は契約の一部なので
/// nalgebra の try_inverse ではなく展開形で書いている。
pub fn invert3x3(m: &Matrix3<f32>) -> Result<Matrix3<f32>, FacelinkError> {
    let det = m[(0, 0)] * (m[(1, 1)] * m[(2, 2)] - m[(1, 2)] * m[(2, 1)])
        - m[(0, 1)] * (m[(1, 0)] * m[(2, 2)] - m[(1, 2)] * m[(2, 0)])
        + m[(0, 2)] * (m[(1, 0)] * m[(2, 1)] - m[(1, 1)] * m[(2, 0)]);

    if det.abs() < DET_EPS {
        return Err(FacelinkError::SingularMatrix { det });
    }

    let inv_det = 1.0 / det;
    Ok(Matrix3::new(
        (m[(1, 1)] * m[(2, 2)] - m[(1, 2)] * m[(2, 1)]) * inv_det,
        (m[(0, 2)] * m[(2, 1)] - m[(0, 1)] * m[(2, 2)]) * inv_det,
        (m[(0, 1)] * m[(1, 2)] - m[(0, 2)] * m[(1, 1)]) * inv_det,
        (m[(1, 2)] * m[(2, 0)] - m[(1, 0)] * m[(2, 2)]) * inv_det,
        (m[(0, 0)] * m[(2, 2)] - m[(0, 2)] * m[(2, 0)]) * inv_det,
        (m[(0, 2)] * m[(1, 0)] - m[(0, 0)] * m[(1, 2)]) * inv_det,
        (m[(1, 0)] * m[(2, 1)] - m[(1, 1)] * m[(2, 0)]) * inv_det,
        (m[(0, 1)] * m[(2, 0)] - m[(0, 0)] * m[(2, 1)]) * inv_det,
        (m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)]) * inv_det,
    ))
}

/// Y行・Y列の符号を反転する
///
/// 検出器のY下向き正の座標系をY上向き正へ変換する。
/// diag(1,-1,1) で挟むのと同じで、(1,1)成分は変わらない。
pub fn flip_y_convention(m: &Matrix3<f32>) -> Matrix3<f32> {
    let f = Matrix3::from_diagonal(&Vector3::new(1.0, -1.0, 1.0));
    f * m * f
}

/// 頭部姿勢（度）
///
/// yaw/roll は [-180,180]、pitch は [-90,90]。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadPose {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

impl HeadPose {
    pub const ZERO: HeadPose = HeadPose {
        yaw: 0.0,
        pitch: 0.0,
        roll: 0.0,
    };

    pub fn new(yaw: f32, pitch: f32, roll: f32) -> Self {
        Self { yaw, pitch, roll }
    }
}

/// 回転行列をオイラー角に分解する
///
/// 検出器の軸向き（+X右, +Y下, +Z前）に合わせた分解。
/// |R[1][2]| が 1 に近い場合はジンバルロックとして roll = 0 の
/// 分岐を使う。結果は度。
pub fn euler_from_rotation(r: &Matrix3<f32>) -> HeadPose {
    let pitch = (-r[(1, 2)]).clamp(-1.0, 1.0).asin();

    let (yaw, roll) = if r[(1, 2)].abs() < 0.99999 {
        (r[(0, 2)].atan2(r[(2, 2)]), r[(1, 0)].atan2(r[(1, 1)]))
    } else {
        // gimbal lock
        ((-r[(0, 1)]).atan2(r[(0, 0)]), 0.0)
    };

    HeadPose::new(yaw.to_degrees(), pitch.to_degrees(), roll.to_degrees())
}

/// 回転行列を全ランドマークに適用する
pub fn apply_rotation(points: &LandmarkSet, m: &Matrix3<f32>) -> LandmarkSet {
    points
        .iter()
        .map(|p| {
            let v = m * Vector3::new(p.x, p.y, p.z);
            Point3D::new(v.x, v.y, v.z)
        })
        .collect()
}
