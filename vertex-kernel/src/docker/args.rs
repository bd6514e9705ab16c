//! `docker create` argument construction

use vertex_core::dto::docker::CreateContainerRequest;

/// Builds the `docker create` arguments for a request
pub fn create_args(req: &CreateContainerRequest) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        req.container_name.clone(),
    ];

    for (container_port, bindings) in &req.port_bindings {
        for binding in bindings {
            let publish = if binding.host_ip.is_empty() {
                format!("{}:{}", binding.host_port, container_port)
            } else {
                format!(
                    "{}:{}:{}",
                    binding.host_ip, binding.host_port, container_port
                )
            };
            args.push("-p".to_string());
            args.push(publish);
        }
    }

    // Exposed ports without a binding are only exposed
    for port in &req.exposed_ports {
        if !req.port_bindings.contains_key(port) {
            args.push("--expose".to_string());
            args.push(port.clone());
        }
    }

    for bind in &req.binds {
        args.push("-v".to_string());
        args.push(bind.clone());
    }

    for env in &req.env {
        args.push("-e".to_string());
        args.push(env.clone());
    }

    for cap in &req.cap_add {
        args.push("--cap-add".to_string());
        args.push(cap.clone());
    }

    for (key, value) in &req.sysctls {
        args.push("--sysctl".to_string());
        args.push(format!("{}={}", key, value));
    }

    args.push(req.image.clone());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use vertex_core::dto::docker::PortBinding;

    #[test]
    fn test_minimal_create_args() {
        let req = CreateContainerRequest {
            image: "redis:7".to_string(),
            container_name: "VERTEX_CONTAINER_1".to_string(),
            ..Default::default()
        };

        assert_eq!(
            create_args(&req),
            vec!["create", "--name", "VERTEX_CONTAINER_1", "redis:7"]
        );
    }

    #[test]
    fn test_full_create_args() {
        let mut port_bindings = BTreeMap::new();
        port_bindings.insert(
            "6379/tcp".to_string(),
            vec![PortBinding {
                host_ip: String::new(),
                host_port: "16379".to_string(),
            }],
        );
        let mut sysctls = BTreeMap::new();
        sysctls.insert("net.core.somaxconn".to_string(), "1024".to_string());

        let req = CreateContainerRequest {
            image: "redis:7".to_string(),
            exposed_ports: vec!["6379/tcp".to_string(), "9000/udp".to_string()],
            port_bindings,
            binds: vec!["/data:/data".to_string()],
            env: vec!["PASSWORD=secret".to_string()],
            cap_add: vec!["NET_ADMIN".to_string()],
            sysctls,
            container_name: "c".to_string(),
        };

        let args = create_args(&req);
        let joined = args.join(" ");

        assert!(joined.contains("-p 16379:6379/tcp"));
        assert!(joined.contains("--expose 9000/udp"));
        assert!(!joined.contains("--expose 6379/tcp"));
        assert!(joined.contains("-v /data:/data"));
        assert!(joined.contains("-e PASSWORD=secret"));
        assert!(joined.contains("--cap-add NET_ADMIN"));
        assert!(joined.contains("--sysctl net.core.somaxconn=1024"));
        assert_eq!(args.last().map(String::as_str), Some("redis:7"));
    }
}
