//! Host service-manager glue for the `service` subcommand. Windows gets
//! real SCM integration; Unix hosts run the agent under systemd or rc.d
//! with their own unit files.

use std::path::Path;

use anyhow::Result;

use crate::ServiceCmd;

#[cfg(windows)]
pub fn handle(cmd: ServiceCmd, config_path: &Path) -> Result<()> {
    use std::ffi::OsString;

    use anyhow::Context;
    use windows_service::service::{
        ServiceAccess, ServiceErrorControl, ServiceInfo, ServiceStartType, ServiceType,
    };
    use windows_service::service_manager::{ServiceManager, ServiceManagerAccess};

    const SERVICE_NAME: &str = "edgemon";

    match cmd {
        ServiceCmd::Install => {
            let manager = ServiceManager::local_computer(
                None::<&str>,
                ServiceManagerAccess::CONNECT | ServiceManagerAccess::CREATE_SERVICE,
            )
            .context("connecting to service manager")?;

            let executable_path =
                std::env::current_exe().context("resolving agent executable path")?;
            let info = ServiceInfo {
                name: OsString::from(SERVICE_NAME),
                display_name: OsString::from("edgemon agent"),
                service_type: ServiceType::OWN_PROCESS,
                start_type: ServiceStartType::AutoStart,
                error_control: ServiceErrorControl::Normal,
                executable_path,
                launch_arguments: vec![
                    OsString::from("--config"),
                    config_path.as_os_str().to_os_string(),
                    OsString::from("service"),
                    OsString::from("run"),
                ],
                dependencies: vec![],
                account_name: None,
                account_password: None,
            };
            manager
                .create_service(&info, ServiceAccess::QUERY_STATUS)
                .context("creating service")?;
            println!("service installed");
        }
        ServiceCmd::Uninstall => {
            let manager =
                ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)
                    .context("connecting to service manager")?;
            let service = manager
                .open_service(SERVICE_NAME, ServiceAccess::DELETE)
                .context("opening service")?;
            service.delete().context("deleting service")?;
            println!("service uninstalled");
        }
        ServiceCmd::Start => {
            let manager =
                ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)
                    .context("connecting to service manager")?;
            let service = manager
                .open_service(SERVICE_NAME, ServiceAccess::START)
                .context("opening service")?;
            service.start::<&str>(&[]).context("starting service")?;
            println!("service started");
        }
        ServiceCmd::Stop => {
            let manager =
                ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)
                    .context("connecting to service manager")?;
            let service = manager
                .open_service(SERVICE_NAME, ServiceAccess::STOP)
                .context("opening service")?;
            service.stop().context("stopping service")?;
            println!("service stopped");
        }
        // handled by main before reaching here
        ServiceCmd::Run => unreachable!("service run is dispatched by main"),
    }
    Ok(())
}

#[cfg(not(windows))]
pub fn handle(cmd: ServiceCmd, _config_path: &Path) -> Result<()> {
    anyhow::bail!(
        "`service {}` is Windows-only; on this platform run `edgemon run` under systemd or rc.d",
        match cmd {
            ServiceCmd::Install => "install",
            ServiceCmd::Uninstall => "uninstall",
            ServiceCmd::Start => "start",
            ServiceCmd::Stop => "stop",
            ServiceCmd::Run => "run",
        }
    )
}
