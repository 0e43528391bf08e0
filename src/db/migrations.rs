/// 数据库迁移
///
/// 表说明：
/// - reminders: 提醒及其 FRP/CRP 触发状态
/// - users: 用户推送令牌
/// - system_status: Worker 开关与最近错误（单行）

use rusqlite::Connection;
use crate::error::AppResult;

/// 运行所有迁移
pub fn run_migrations(conn: &Connection) -> AppResult<()> {
    create_users_table(conn)?;
    create_reminders_table(conn)?;
    create_system_status_table(conn)?;

    Ok(())
}

/// 创建 users 表
fn create_users_table(conn: &Connection) -> AppResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            fcm_token TEXT,
            is_fcm_active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    Ok(())
}

/// 创建 reminders 表
fn create_reminders_table(conn: &Connection) -> AppResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS reminders (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            type TEXT NOT NULL,
            calendar_type TEXT NOT NULL DEFAULT 'solar',
            status TEXT NOT NULL DEFAULT 'active',
            recurrence_pattern TEXT,
            next_recurring INTEGER,
            next_crp INTEGER,
            crp_interval_sec INTEGER NOT NULL DEFAULT 0,
            max_crp INTEGER NOT NULL DEFAULT 0,
            crp_count INTEGER NOT NULL DEFAULT 0,
            repeat_strategy TEXT NOT NULL DEFAULT 'none',
            next_action_at INTEGER,
            snooze_until INTEGER,
            last_sent_at INTEGER,
            last_crp_completed_at INTEGER,
            last_completed_at INTEGER,
            cycle_started_at INTEGER,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )",
        [],
    )?;

    // 到期查询索引
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reminders_due
         ON reminders(status, next_action_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reminders_user_id
         ON reminders(user_id)",
        [],
    )?;

    Ok(())
}

/// 创建 system_status 表并写入默认行
fn create_system_status_table(conn: &Connection) -> AppResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS system_status (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            worker_enabled INTEGER NOT NULL DEFAULT 1,
            last_error TEXT NOT NULL DEFAULT '',
            updated_at INTEGER
        )",
        [],
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO system_status (id, worker_enabled, last_error) VALUES (1, 1, '')",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_seed_status_row() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM system_status", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }
}
