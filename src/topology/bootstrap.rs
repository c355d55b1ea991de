//! First-boot script for the web server instance.
//!
//! Step order is fixed: install (bounded retry) → start the container
//! runtime → group membership → enable the runtime → compose tool → source
//! fetch → workload start. Each step tolerates being run again.

pub const MAX_INSTALL_ATTEMPTS: u32 = 5;
pub const INSTALL_BACKOFF_SECS: u32 = 3;

pub const BOOTSTRAP_SCRIPT: &str = r#"#!/bin/bash
max_attempts=5
attempt_num=1
success=false
while [ $success = false ] && [ $attempt_num -le $max_attempts ]; do
  sudo dnf install -y git docker
  if [ $? -eq 0 ]; then
    echo "dnf install succeeded"
    success=true
  else
    echo "dnf install $attempt_num failed. trying again..."
    sleep 3
    ((attempt_num++))
  fi
done

sudo systemctl start docker
sudo gpasswd -a ec2-user docker
sudo gpasswd -a ssm-user docker
sudo chgrp docker /var/run/docker.sock
sudo service docker restart
sudo systemctl enable docker
sudo curl -L "https://github.com/docker/compose/releases/latest/download/docker-compose-$(uname -s)-$(uname -m)" -o /usr/local/bin/docker-compose
sudo chmod +x /usr/local/bin/docker-compose
sudo ln -s /usr/local/bin/docker-compose /usr/bin/docker-compose
cd /opt
sudo git clone https://github.com/kodato-dev/forked-dify.git dify
cd /opt/dify
sudo git pull origin main
cd /opt/dify/docker
sudo cp .env.example .env
docker-compose up -d
"#;
