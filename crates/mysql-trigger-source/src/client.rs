use crate::SourceOpts;
use mysql_async::{Opts, OptsBuilder, Pool};

/// Audit timestamps are read back as UTC, so every pooled session runs in UTC.
const SESSION_INIT: &str = "SET time_zone = '+00:00'";

pub(crate) fn mysql_opts(opts: &SourceOpts) -> Opts {
    OptsBuilder::default()
        .ip_or_hostname(opts.host.clone())
        .tcp_port(opts.port)
        .user(Some(opts.user.clone()))
        .pass(Some(opts.password.clone()))
        .db_name(Some(opts.database.clone()))
        .init(vec![SESSION_INIT])
        .into()
}

/// Create a connection pool. Connections are opened lazily.
pub fn new_mysql_pool(opts: &SourceOpts) -> Pool {
    Pool::new(mysql_opts(opts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{Identifier, OperationSet};
    use std::time::Duration;

    #[test]
    fn test_opts_carry_connection_settings() {
        let opts = SourceOpts {
            host: "db.internal".to_string(),
            port: 3307,
            user: "relay".to_string(),
            password: "secret".to_string(),
            database: "shop".to_string(),
            table: Identifier::new("orders").unwrap(),
            operations: OperationSet::all(),
            poll_interval: Duration::from_secs(5),
        };

        let mysql = mysql_opts(&opts);
        assert_eq!(mysql.ip_or_hostname().to_string(), "db.internal");
        assert_eq!(mysql.tcp_port(), 3307);
        assert_eq!(mysql.user(), Some("relay"));
        assert_eq!(mysql.db_name(), Some("shop"));
        assert_eq!(mysql.init().to_vec(), vec![SESSION_INIT.to_string()]);
    }
}
