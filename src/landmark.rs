/// 検出器が出力する3Dランドマーク1点
///
/// キャプチャ時はピクセル座標、正規化後は正規化単位。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3D {
    pub const ZERO: Point3D = Point3D {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// 2点間のユークリッド距離
    pub fn distance(&self, other: &Point3D) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// 顔ランドマークの順序付き集合
///
/// インデックスは解剖学的な意味を持つ（`index` モジュール参照）。
/// サポートする検出器は FaceMesh の468点を出力する。
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    points: Vec<Point3D>,
}

impl LandmarkSet {
    /// FaceMesh 検出器のランドマーク数
    pub const FACE_MESH_COUNT: usize = 468;

    pub fn new(points: Vec<Point3D>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Point3D> {
        self.points.get(index)
    }

    pub fn points(&self) -> &[Point3D] {
        &self.points
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point3D> {
        self.points.iter()
    }

    /// 全点を覆う境界ボックス。空集合なら None
    pub fn bounding_box(&self) -> Option<BoundingBox3D> {
        BoundingBox3D::from_points(&self.points)
    }

    /// 指定インデックス群の重心。範囲外インデックスを含む場合は None
    pub fn centroid_of(&self, indices: &[usize]) -> Option<Point3D> {
        if indices.is_empty() {
            return None;
        }
        let mut sum = Point3D::ZERO;
        for &i in indices {
            let p = self.points.get(i)?;
            sum.x += p.x;
            sum.y += p.y;
            sum.z += p.z;
        }
        let n = indices.len() as f32;
        Some(Point3D::new(sum.x / n, sum.y / n, sum.z / n))
    }
}

impl std::ops::Index<usize> for LandmarkSet {
    type Output = Point3D;

    fn index(&self, index: usize) -> &Point3D {
        &self.points[index]
    }
}

impl FromIterator<Point3D> for LandmarkSet {
    fn from_iter<T: IntoIterator<Item = Point3D>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// ランドマーク集合から導出される軸並行境界ボックス
///
/// 不変条件: 各軸で min <= max、center は (min+max)/2、
/// width/height/depth は max-min。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox3D {
    pub min: Point3D,
    pub max: Point3D,
    pub center: Point3D,
    pub width: f32,
    pub height: f32,
    pub depth: f32,
}

impl BoundingBox3D {
    /// 点列から構築。空なら None
    pub fn from_points(points: &[Point3D]) -> Option<Self> {
        let first = points.first()?;
        let mut min = *first;
        let mut max = *first;
        for p in &points[1..] {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }
        Some(Self {
            min,
            max,
            center: Point3D::new(
                (min.x + max.x) / 2.0,
                (min.y + max.y) / 2.0,
                (min.z + max.z) / 2.0,
            ),
            width: max.x - min.x,
            height: max.y - min.y,
            depth: max.z - min.z,
        })
    }
}

/// FaceMesh 468点の解剖学的インデックス
pub mod index {
    /// 鼻先
    pub const NOSE_TIP: usize = 4;
    /// 左目外側の目尻
    pub const LEFT_EYE_OUTER: usize = 33;
    /// 右目外側の目尻
    pub const RIGHT_EYE_OUTER: usize = 263;
    /// 左口角
    pub const MOUTH_LEFT: usize = 61;
    /// 右口角
    pub const MOUTH_RIGHT: usize = 291;

    /// 上顔面トリオ（額のライン）。重心がミッドライン上端
    pub const UPPER_MIDLINE: [usize; 3] = [10, 67, 297];
    /// 下顔面トリオ（顎のライン）。重心がミッドライン下端
    pub const LOWER_MIDLINE: [usize; 3] = [152, 148, 377];
}
