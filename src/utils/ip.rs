//! 客户端 IP 提取

use std::net::{IpAddr, SocketAddr};

use actix_web::HttpRequest;

/// 服务端看到的访客地址，支持 `Forwarded` / `X-Forwarded-For`，
/// 去掉端口部分
pub fn client_ip(req: &HttpRequest) -> String {
    let info = req.connection_info();
    info.realip_remote_addr()
        .map(strip_port)
        .unwrap_or_else(|| "unknown".to_string())
}

fn strip_port(addr: &str) -> String {
    if let Ok(socket) = addr.parse::<SocketAddr>() {
        return socket.ip().to_string();
    }
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return ip.to_string();
    }
    addr.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("1.2.3.4:5678"), "1.2.3.4");
        assert_eq!(strip_port("[::1]:80"), "::1");
        assert_eq!(strip_port("::1"), "::1");
        assert_eq!(strip_port("10.0.0.1"), "10.0.0.1");
        assert_eq!(strip_port("host.local"), "host.local");
    }

    #[test]
    fn test_forwarded_header() {
        let req = TestRequest::default()
            .insert_header(("X-Forwarded-For", "203.0.113.7, 10.0.0.1"))
            .to_http_request();
        assert_eq!(client_ip(&req), "203.0.113.7");
    }

    #[test]
    fn test_peer_addr() {
        let req = TestRequest::default()
            .peer_addr("198.51.100.2:4000".parse().unwrap())
            .to_http_request();
        assert_eq!(client_ip(&req), "198.51.100.2");
    }
}
