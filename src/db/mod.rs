use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use crate::error::{AppError, AppResult};

pub mod migrations;
pub mod repository;

/// 数据库管理器
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// 创建新的数据库连接
    ///
    /// 父目录不存在时会先创建
    pub fn new(db_path: PathBuf) -> AppResult<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;

        // 启用外键约束
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 初始化数据库表结构
    pub fn initialize(&self) -> AppResult<()> {
        self.with_connection(migrations::run_migrations)
    }

    /// 获取数据库连接的引用（需要锁定）
    pub fn with_connection<F, R>(&self, f: F) -> AppResult<R>
    where
        F: FnOnce(&Connection) -> AppResult<R>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| AppError::database(2, "数据库连接锁已损坏"))?;
        f(&conn)
    }
}
