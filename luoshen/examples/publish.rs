// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Publish a few messages to a local broker.

use luoshen::{Client, ConnectOptions, Message, QoS};

fn main() -> Result<(), luoshen::Error> {
    env_logger::init();

    let options = ConnectOptions::builder("127.0.0.1", 1883)
        .client_id("luoshen-publish-example")
        .build()?;
    let client = Client::new(options);
    client.start();

    client.connect(true).wait()?;
    println!("connected: {}", client.is_connected());

    for index in 0..3 {
        let payload = format!("hello {index}");
        let message = Message::new("luoshen/example", QoS::AtLeastOnce, payload.as_bytes())?;
        client.publish(message).wait()?;
        println!("published: {payload}");
    }

    client.disconnect().wait()?;
    client.stop();
    Ok(())
}
