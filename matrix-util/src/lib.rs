pub mod common_io;
pub mod dmatrix_util;
pub mod ndarray_io;
pub mod ndarray_stat;
pub mod ndarray_util;
pub mod tensor_util;
pub mod traits;
