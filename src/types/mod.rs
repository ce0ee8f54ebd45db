// src/types/mod.rs

//! 数据类型：目前只有带时间戳的有序集合
pub mod zset;
