//! 缓冲区缓存的编译期配置

/// 磁盘块大小（字节）
pub const BSIZE: usize = 1024;

/// 缓冲区总数
pub const NBUF: usize = 30;

/// 分片（桶）数量，取素数让哈希分布更均匀
pub const NBUCKET: usize = 7;
