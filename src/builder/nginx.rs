//! Generated nginx configuration for the web tier
//!
//! `nginx.conf` is static. `default.conf` proxies the four API services,
//! optionally proxies MinIO under a path prefix, and serves the SPA.

use std::fmt::Write as _;

use super::BackendService;
use crate::crd::KubeNova;

pub const NGINX_CONF_KEY: &str = "nginx.conf";
pub const DEFAULT_CONF_KEY: &str = "default.conf";

const NGINX_CONF: &str = r#"worker_processes auto;
worker_rlimit_nofile 65535;

error_log /var/log/nginx/error.log warn;

events {
    worker_connections 4096;
    use epoll;
    multi_accept on;
}

http {
    include /etc/nginx/mime.types;
    default_type application/octet-stream;

    log_format main '$remote_addr - $remote_user [$time_local] "$request" '
                    '$status $body_bytes_sent "$http_referer" '
                    '"$http_user_agent" "$http_x_forwarded_for" '
                    'rt=$request_time uct="$upstream_connect_time" '
                    'uht="$upstream_header_time" urt="$upstream_response_time"';

    access_log /var/log/nginx/access.log main;

    sendfile on;
    tcp_nopush on;
    tcp_nodelay on;
    keepalive_timeout 65;
    keepalive_requests 100;
    types_hash_max_size 2048;
    server_tokens off;

    client_body_buffer_size 128k;
    client_max_body_size 1024m;
    client_header_buffer_size 1k;
    large_client_header_buffers 4 16k;

    client_header_timeout 15s;
    client_body_timeout 15s;
    send_timeout 15s;

    gzip on;
    gzip_vary on;
    gzip_proxied any;
    gzip_comp_level 6;
    gzip_min_length 1000;
    gzip_types text/plain text/css text/xml text/javascript
               application/json application/javascript application/xml+rss
               image/svg+xml;

    limit_req_zone $binary_remote_addr zone=general:10m rate=100r/s;
    limit_req_zone $binary_remote_addr zone=api:10m rate=50r/s;
    limit_conn_zone $binary_remote_addr zone=addr:10m;

    include /etc/nginx/conf.d/*.conf;
}
"#;

const PROXY_HEADERS: &str = "        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_set_header X-Forwarded-Host $host;
        proxy_set_header X-Forwarded-Port $server_port;
";

const SECURITY_HEADERS: &str = r#"    add_header X-Frame-Options "SAMEORIGIN" always;
    add_header X-Content-Type-Options "nosniff" always;
    add_header X-XSS-Protection "1; mode=block" always;
    add_header Referrer-Policy "no-referrer-when-downgrade" always;
"#;

const STATIC_LOCATIONS: &str = r#"
    location ~* \.(js|css)$ {
        expires 1y;
        add_header Cache-Control "public, must-revalidate";
        access_log off;
    }

    location ~* \.html$ {
        expires -1;
        add_header Cache-Control "no-store, no-cache, must-revalidate, max-age=0";
    }

    location ~ /\. {
        deny all;
        access_log off;
        log_not_found off;
    }

    location / {
        try_files $uri $uri/ /index.html;
        add_header Cache-Control "no-store, no-cache, must-revalidate, max-age=0";
    }

    error_page 404 /index.html;
    error_page 500 502 503 504 /50x.html;

    location = /50x.html {
        root /usr/share/nginx/html;
        internal;
    }
"#;

/// API services fronted by the web tier and the path each one owns
const API_ROUTES: [(BackendService, &str); 4] = [
    (BackendService::PortalApi, "/portal"),
    (BackendService::ManagerApi, "/manager"),
    (BackendService::WorkloadApi, "/workload"),
    (BackendService::ConsoleApi, "/console"),
];

/// WebSocket endpoints and the API serving them
const WEBSOCKET_ROUTES: [(&str, BackendService); 2] = [
    ("/ws/v1/pod", BackendService::ConsoleApi),
    ("/ws/v1/site-messages", BackendService::PortalApi),
];

pub fn nginx_conf() -> &'static str {
    NGINX_CONF
}

fn upstream_name(service: BackendService) -> String {
    service.name().replace('-', "_")
}

pub fn default_conf(kn: &KubeNova) -> String {
    let mut out = String::new();

    for (service, _) in API_ROUTES {
        let _ = write!(
            out,
            "upstream {upstream} {{
    least_conn;
    server {name}:{port} max_fails=3 fail_timeout=30s;
    keepalive 32;
}}

",
            upstream = upstream_name(service),
            name = service.name(),
            port = service.port(),
        );
    }

    if kn.spec.web.minio_proxy_enabled() {
        let _ = write!(
            out,
            "upstream minio_backend {{
    least_conn;
    server {} max_fails=3 fail_timeout=30s;
    keepalive 32;
}}

",
            kn.spec.storage.endpoint
        );
    }

    let https = kn.spec.web.node_port_https().is_some();
    if https {
        out.push_str(
            "server {
    listen 80;
    server_name _;
    return 301 https://$host$request_uri;
}

",
        );
        out.push_str(&server_block(kn, true));
    } else {
        out.push_str(&server_block(kn, false));
    }

    out
}

fn server_block(kn: &KubeNova, tls: bool) -> String {
    let mut out = String::from("server {\n");
    if tls {
        out.push_str(
            "    listen 443 ssl http2;
    server_name _;

    ssl_certificate /etc/nginx/certs/tls.crt;
    ssl_certificate_key /etc/nginx/certs/tls.key;
    ssl_protocols TLSv1.2 TLSv1.3;
    ssl_ciphers HIGH:!aNULL:!MD5;
    ssl_prefer_server_ciphers on;
    ssl_session_cache shared:SSL:10m;
    ssl_session_timeout 10m;
",
        );
    } else {
        out.push_str("    listen 80;\n    server_name _;\n");
    }

    out.push_str("\n    root /usr/share/nginx/html;\n    index index.html;\n    charset utf-8;\n\n");
    out.push_str(SECURITY_HEADERS);
    if tls {
        out.push_str(
            "    add_header Strict-Transport-Security \"max-age=31536000; includeSubDomains\" always;\n",
        );
    }
    out.push_str(
        "
    limit_req zone=general burst=200 nodelay;
    limit_conn addr 20;

    location /health {
        access_log off;
        return 200 \"healthy\\n\";
        add_header Content-Type text/plain;
    }
",
    );

    for (path, service) in WEBSOCKET_ROUTES {
        let _ = write!(
            out,
            "
    location {path} {{
        proxy_pass http://{upstream};
        proxy_http_version 1.1;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection \"upgrade\";
{PROXY_HEADERS}        proxy_connect_timeout 7d;
        proxy_send_timeout 7d;
        proxy_read_timeout 7d;
        proxy_buffering off;
        proxy_request_buffering off;
        limit_req zone=api burst=10 nodelay;
    }}
",
            upstream = upstream_name(service),
        );
    }

    for (service, path) in API_ROUTES {
        // Console responses stream, so it gets long timeouts and no buffering
        let (timeout, buffering) = if service == BackendService::ConsoleApi {
            ("600s", "proxy_buffering off;\n        proxy_request_buffering off;")
        } else {
            ("30s", "proxy_buffering on;\n        proxy_buffer_size 4k;\n        proxy_buffers 8 4k;")
        };
        let _ = write!(
            out,
            "
    location {path} {{
        proxy_pass http://{upstream};
{PROXY_HEADERS}        proxy_http_version 1.1;
        proxy_set_header Connection \"\";
        proxy_connect_timeout {timeout};
        proxy_send_timeout {timeout};
        proxy_read_timeout {timeout};
        {buffering}
        proxy_next_upstream error timeout invalid_header http_500 http_502 http_503 http_504;
        proxy_next_upstream_tries 2;
        limit_req zone=api burst=20 nodelay;
    }}
",
            upstream = upstream_name(service),
        );
    }

    if kn.spec.web.minio_proxy_enabled() {
        out.push_str(&minio_location(kn));
    }

    out.push_str(STATIC_LOCATIONS);
    out.push_str("}\n");
    out
}

fn minio_location(kn: &KubeNova) -> String {
    let prefix = kn.spec.web.minio_proxy_path().trim_end_matches('/');
    let storage_tls = kn.spec.storage.tls_enabled();
    let scheme = if storage_tls { "https" } else { "http" };

    let mut out = format!(
        "
    location {prefix}/ {{
        rewrite ^{prefix}/(.*)$ /$1 break;
        proxy_pass {scheme}://minio_backend;
        proxy_set_header Host $http_host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_http_version 1.1;
        proxy_set_header Connection \"\";
        client_max_body_size 5000m;
        proxy_connect_timeout 600s;
        proxy_send_timeout 600s;
        proxy_read_timeout 600s;
        proxy_buffering off;
        proxy_request_buffering off;
        proxy_next_upstream error timeout http_502 http_503 http_504;
        proxy_next_upstream_tries 2;
"
    );
    if storage_tls {
        out.push_str(
            "        proxy_ssl_verify off;
        proxy_ssl_server_name on;
        proxy_ssl_protocols TLSv1.2 TLSv1.3;
",
        );
    }
    out.push_str("    }\n");
    out
}
