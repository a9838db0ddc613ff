pub mod labels {

    pub const APP: &str = "app";

    pub const CREATED_BY: &str = "created-by";

    pub const CREATED_BY_VALUE: &str = "blockyard";
}

pub mod annotations {

    /// Bumped on the pod template to make the platform roll the pods.
    pub const RESTARTED_AT: &str = "kubectl.kubernetes.io/restartedAt";

    /// Read by mc-router to route a hostname to the service.
    pub const MC_ROUTER_SERVER_NAME: &str = "mc-router.itzg.me/externalServerName";
}

pub mod game {

    pub const CONTAINER_NAME: &str = "minecraft-server";

    pub const PORT: i32 = 25565;

    pub const PORT_NAME: &str = "minecraft";

    pub const DATA_PATH: &str = "/data";

    pub const VOLUME_NAME: &str = "minecraft-storage";

    /// Environment every server starts with; request overrides win on conflict.
    pub const BASE_ENV: &[(&str, &str)] = &[("EULA", "TRUE"), ("CREATE_CONSOLE_IN_PIPE", "true")];
}

pub mod console {

    pub const SHELL: &[&str] = &["/bin/bash", "-c"];

    /// Forwards its arguments to the server console through the named pipe.
    pub const DISPATCH_PREFIX: &str = "mc-send-to-console";

    pub const SAVE_ALL: &str = "mc-send-to-console save-all";

    pub const PRE_STOP: &str = "mc-send-to-console save-all stop && sleep 5";
}

pub mod limits {

    /// Longest server name that still yields valid object names with the default affixes.
    pub const MAX_SERVER_NAME_LEN: usize = 40;

    pub const MIN_USERNAME_LEN: usize = 3;

    pub const MAX_USERNAME_LEN: usize = 50;

    pub const API_KEY_RANDOM_LEN: usize = 32;
}
