//! 数学库模块
//!
//! 基于 `nalgebra` 提供光线追踪示例所需的少量数学类型。
//!
//! # 模块组织
//!
//! - **基础类型**：Vector3/4, Matrix4, Quaternion
//! - **常量**：PI, TAU, DEG_TO_RAD 等
//! - **矩阵辅助函数**：平移、缩放、旋转
//! - **实例变换**：`Transform3x4`，TLAS 实例描述符使用的行主序 3x4 矩阵

pub use nalgebra::{
    Matrix4 as Mat4, UnitQuaternion, Vector3 as Vec3, Vector4 as Vec4,
};

// 类型别名，使用更简洁的名称
pub type Vector3 = Vec3<f32>;
pub type Vector4 = Vec4<f32>;
pub type Matrix4 = Mat4<f32>;
pub type Quaternion = UnitQuaternion<f32>;

/// 数学常量
pub mod constants {
    /// π
    pub const PI: f32 = std::f32::consts::PI;

    /// 2π
    pub const TAU: f32 = std::f32::consts::TAU;

    /// 角度转弧度的系数
    pub const DEG_TO_RAD: f32 = PI / 180.0;

    /// 浮点数比较的 epsilon
    pub const EPSILON: f32 = 1e-6;
}

/// 矩阵辅助函数
pub mod matrix {
    use super::*;

    /// 平移矩阵
    pub fn translation(x: f32, y: f32, z: f32) -> Matrix4 {
        Matrix4::new_translation(&Vector3::new(x, y, z))
    }

    /// 缩放矩阵
    pub fn scaling(x: f32, y: f32, z: f32) -> Matrix4 {
        Matrix4::new_nonuniform_scaling(&Vector3::new(x, y, z))
    }

    /// 绕 Y 轴旋转
    pub fn rotation_y(angle: f32) -> Matrix4 {
        Matrix4::from_axis_angle(&Vector3::y_axis(), angle)
    }

    /// 从四元数构建旋转矩阵
    pub fn from_quaternion(quat: &Quaternion) -> Matrix4 {
        quat.to_homogeneous()
    }
}

/// 实例变换（行主序 3x4）
///
/// 与 `D3D12_RAYTRACING_INSTANCE_DESC::Transform` 的内存布局一致：
/// 三行，每行四个 float，最后一列是平移。
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Transform3x4(pub [f32; 12]);

impl Transform3x4 {
    /// 单位变换
    pub const IDENTITY: Self = Self([
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
    ]);

    /// 从 4x4 仿射矩阵截取前三行
    pub fn from_matrix(m: &Matrix4) -> Self {
        let mut out = [0.0f32; 12];
        for row in 0..3 {
            for col in 0..4 {
                out[row * 4 + col] = m[(row, col)];
            }
        }
        Self(out)
    }

    /// 平移分量
    pub fn translation(&self) -> Vector3 {
        Vector3::new(self.0[3], self.0[7], self.0[11])
    }
}

impl Default for Transform3x4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<Matrix4> for Transform3x4 {
    fn from(m: Matrix4) -> Self {
        Self::from_matrix(&m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_translation() {
        let mat = matrix::translation(1.0, 2.0, 3.0);
        let point = Vector4::new(0.0, 0.0, 0.0, 1.0);
        let result = mat * point;

        assert!((result.x - 1.0).abs() < constants::EPSILON);
        assert!((result.y - 2.0).abs() < constants::EPSILON);
        assert!((result.z - 3.0).abs() < constants::EPSILON);
    }

    #[test]
    fn test_transform_3x4_is_row_major() {
        let t = Transform3x4::from_matrix(&matrix::translation(4.0, 5.0, 6.0));
        assert_eq!(t.translation(), Vector3::new(4.0, 5.0, 6.0));
        assert_eq!(t.0[0], 1.0);
        assert_eq!(t.0[5], 1.0);
        assert_eq!(t.0[10], 1.0);
        assert_eq!(std::mem::size_of::<Transform3x4>(), 48);
    }

    #[test]
    fn test_identity_matches_identity_matrix() {
        assert_eq!(Transform3x4::from(Matrix4::identity()), Transform3x4::IDENTITY);
    }
}
